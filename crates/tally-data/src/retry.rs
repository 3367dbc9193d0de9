//! # Retry Policy
//!
//! Bounded exponential backoff for the sale commit.
//!
//! ```text
//! attempt 1 ──fail──► wait 1s ──► attempt 2 ──fail──► wait 2s ──► attempt 3 ──fail──► error
//! ```
//!
//! Only [`DataError::is_retryable`] errors are retried. Insufficient stock,
//! permission and validation failures return on the first attempt.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{DataError, DataResult};

/// Upper bound on a single wait.
const MAX_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            multiplier: settings.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: MAX_INTERVAL,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> DataResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DataResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                warn!(operation = name, attempts = attempt, error = %err, "Retries exhausted");
                return Err(err);
            }

            let Some(wait) = backoff.next_backoff() else {
                return Err(err);
            };
            debug!(operation = name, attempt, ?wait, error = %err, "Retrying after transient failure");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tally_core::CoreError;
    use tally_db::DbError;
    use tokio::time::Instant;

    fn conflict() -> DataError {
        DataError::Database(DbError::StockConflict {
            product_id: "p1".into(),
            expected_version: 0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_backs_off_one_then_two_seconds() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .run("commit", |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(conflict())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3));
        assert!(waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .run::<(), _, _>("commit", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DataError::Database(DbError::PoolExhausted))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, DataError::Database(DbError::PoolExhausted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .run::<(), _, _>("commit", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DataError::Core(CoreError::InsufficientStock {
                        product: "Garment Bag".into(),
                        available: 1.into(),
                        requested: 4.into(),
                    }))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_user_facing());
    }
}
