//! # Ledger Outbox Processor
//!
//! Delivers ledger entries queued by sale commits into `stock_history`.
//!
//! ## Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Ledger Outbox Processor Flow                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    ledger_outbox Table                          │   │
//! │  │                                                                 │   │
//! │  │  id | store_id | entry_json | attempts | delivered_at           │   │
//! │  │  ───┼──────────┼────────────┼──────────┼──────────────          │   │
//! │  │  t1 │ store-1  │ {sale -3}  │ 0        │ NULL                   │   │
//! │  │  t2 │ store-1  │ {sale -1}  │ 2        │ NULL                   │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 LedgerOutboxProcessor                           │   │
//! │  │                                                                 │   │
//! │  │  1. Poll: pending tasks, oldest first, LIMIT batch_size        │   │
//! │  │  2. Skip: tasks past max_attempts (logged, left for an         │   │
//! │  │           operator)                                            │   │
//! │  │  3. Deliver: INSERT stock_history + mark delivered, one        │   │
//! │  │              transaction per task                              │   │
//! │  │  4. Failure: attempts += 1, last_error recorded                │   │
//! │  │  5. Cleanup: delivered tasks older than the retention window   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  The invoice writer also delivers its own tasks right after commit;    │
//! │  the processor picks up whatever that attempt left behind.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::TimeDelta;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tally_db::Database;

use crate::clock::SharedClock;
use crate::config::OutboxSettings;
use crate::error::{DataError, DataResult};

// =============================================================================
// Constants
// =============================================================================

/// How long delivered tasks are kept before cleanup.
const DELIVERED_RETENTION_DAYS: i64 = 7;

// =============================================================================
// Delivery
// =============================================================================

/// Outcome of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Tasks some earlier pass had already delivered.
    pub already_delivered: usize,
    pub failed: usize,
    /// Tasks left alone because they ran out of attempts.
    pub skipped: usize,
}

/// Moves outbox tasks into the ledger.
#[derive(Debug, Clone)]
pub struct LedgerDelivery {
    db: Database,
    clock: SharedClock,
}

impl LedgerDelivery {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        LedgerDelivery { db, clock }
    }

    /// Delivers the given tasks. Failures are recorded on the task and
    /// logged, never returned.
    pub async fn deliver(&self, task_ids: &[String]) -> DeliveryReport {
        let outbox = self.db.ledger_outbox();
        let mut report = DeliveryReport::default();

        for id in task_ids {
            let now = self.clock.now();
            match outbox.deliver(id, now).await {
                Ok(Some(_)) => report.delivered += 1,
                Ok(None) => report.already_delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(task_id = %id, error = %e, "Ledger delivery failed");
                    if let Err(mark_err) = outbox.mark_failed(id, &e.to_string(), now).await {
                        error!(?mark_err, task_id = %id, "Failed to record ledger delivery failure");
                    }
                }
            }
        }

        report
    }

    /// One pass over the oldest pending tasks.
    pub async fn drain_once(&self, batch_size: u32, max_attempts: u32) -> DataResult<DeliveryReport> {
        let tasks = self.db.ledger_outbox().pending(batch_size).await?;
        if tasks.is_empty() {
            debug!("No pending ledger tasks");
            return Ok(DeliveryReport::default());
        }

        let (processable, skipped): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.attempts < max_attempts);

        for task in &skipped {
            warn!(
                task_id = %task.id,
                store_id = %task.store_id,
                product_id = %task.entry.product_id,
                attempts = task.attempts,
                last_error = ?task.last_error,
                "Skipping ledger task that exceeded max attempts"
            );
        }

        let ids: Vec<String> = processable.into_iter().map(|t| t.id).collect();
        let mut report = self.deliver(&ids).await;
        report.skipped = skipped.len();

        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "Ledger outbox batch processed"
            );
        }
        Ok(report)
    }

    /// Removes delivered tasks past the retention window.
    pub async fn cleanup(&self) -> DataResult<u64> {
        let before = self.clock.now() - TimeDelta::days(DELIVERED_RETENTION_DAYS);
        Ok(self.db.ledger_outbox().cleanup_delivered(before).await?)
    }
}

// =============================================================================
// Outbox Processor
// =============================================================================

/// Background worker draining the ledger outbox.
pub struct LedgerOutboxProcessor {
    delivery: LedgerDelivery,
    settings: OutboxSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the outbox processor.
#[derive(Clone)]
pub struct LedgerOutboxHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl LedgerOutboxHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> DataResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| DataError::ChannelError("Shutdown channel closed".into()))
    }
}

impl LedgerOutboxProcessor {
    /// Creates a new processor and returns a handle.
    pub fn new(delivery: LedgerDelivery, settings: OutboxSettings) -> (Self, LedgerOutboxHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = LedgerOutboxProcessor {
            delivery,
            settings,
            shutdown_rx,
        };

        (processor, LedgerOutboxHandle { shutdown_tx })
    }

    /// Runs the processor loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Ledger outbox processor starting");

        let poll_interval = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self
                        .delivery
                        .drain_once(self.settings.batch_size, self.settings.max_attempts)
                        .await
                    {
                        error!(?e, "Failed to process ledger outbox batch");
                    }
                    match self.delivery.cleanup().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Delivered ledger tasks cleaned up"),
                        Err(e) => warn!(?e, "Ledger outbox cleanup failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Ledger outbox processor shutting down");
                    break;
                }
            }
        }

        info!("Ledger outbox processor stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
