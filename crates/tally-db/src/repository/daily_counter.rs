//! # Daily Counter Repository
//!
//! Per-store, per-day invoice sequence numbers.
//!
//! ```text
//! INSERT INTO daily_counters (..., last_number) VALUES (..., 1)
//! ON CONFLICT (store_id, date) DO UPDATE
//!     SET last_number = daily_counters.last_number + 1
//! RETURNING last_number
//! ```
//!
//! The increment is a single statement, so two tills asking at the same
//! moment always get different numbers.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{Collection, DailyCounter};

/// Audit stamp recorded when a counter is written by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterStamp {
    /// Repaired from the invoices actually stored.
    Fixed,
    /// Reset by an administrator.
    Reset { by: String },
}

/// Repository for daily counter operations.
#[derive(Debug, Clone)]
pub struct DailyCounterRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl DailyCounterRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        DailyCounterRepository { pool, feed }
    }

    /// Atomically increments the counter for `date` and returns the new value.
    ///
    /// A missing counter starts at 1.
    pub async fn increment(
        &self,
        store_id: &str,
        date: NaiveDate,
        date_key: &str,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let next: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO daily_counters (store_id, date, date_key, last_number, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT (store_id, date) DO UPDATE SET
                last_number = daily_counters.last_number + 1,
                date_key = excluded.date_key,
                updated_at = excluded.updated_at
            RETURNING last_number
            "#,
        )
        .bind(store_id)
        .bind(date)
        .bind(date_key)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(store_id = %store_id, date = %date, next, "Daily counter incremented");
        self.feed.publish(ChangeEvent::upserted(
            store_id,
            Collection::DailyCounters,
            &date.to_string(),
        ));
        Ok(next)
    }

    pub async fn get(&self, store_id: &str, date: NaiveDate) -> DbResult<Option<DailyCounter>> {
        let counter = sqlx::query_as::<_, DailyCounter>(
            "SELECT * FROM daily_counters WHERE store_id = ? AND date = ?",
        )
        .bind(store_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(counter)
    }

    /// All counters of a store, most recent date first.
    pub async fn list(&self, store_id: &str) -> DbResult<Vec<DailyCounter>> {
        let counters = sqlx::query_as::<_, DailyCounter>(
            "SELECT * FROM daily_counters WHERE store_id = ? ORDER BY date DESC",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counters)
    }

    /// Overwrites the counter value, recording why.
    pub async fn set(
        &self,
        store_id: &str,
        date: NaiveDate,
        date_key: &str,
        last_number: i64,
        stamp: CounterStamp,
        now: DateTime<Utc>,
    ) -> DbResult<DailyCounter> {
        let (fixed_at, reset_at, reset_by) = match &stamp {
            CounterStamp::Fixed => (Some(now), None, None),
            CounterStamp::Reset { by } => (None, Some(now), Some(by.clone())),
        };

        let counter = sqlx::query_as::<_, DailyCounter>(
            r#"
            INSERT INTO daily_counters
                (store_id, date, date_key, last_number, updated_at, fixed_at, reset_at, reset_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (store_id, date) DO UPDATE SET
                date_key = excluded.date_key,
                last_number = excluded.last_number,
                updated_at = excluded.updated_at,
                fixed_at = COALESCE(excluded.fixed_at, daily_counters.fixed_at),
                reset_at = COALESCE(excluded.reset_at, daily_counters.reset_at),
                reset_by = COALESCE(excluded.reset_by, daily_counters.reset_by)
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(date)
        .bind(date_key)
        .bind(last_number)
        .bind(now)
        .bind(fixed_at)
        .bind(reset_at)
        .bind(reset_by)
        .fetch_one(&self.pool)
        .await?;

        info!(
            store_id = %store_id,
            date = %date,
            last_number,
            stamp = ?stamp,
            "Daily counter written"
        );
        self.feed.publish(ChangeEvent::upserted(
            store_id,
            Collection::DailyCounters,
            &date.to_string(),
        ));
        Ok(counter)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[tokio::test]
    async fn test_increment_starts_at_one() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.daily_counters();
        let now = Utc::now();

        assert_eq!(repo.increment("s1", day(15), "15012025", now).await.unwrap(), 1);
        assert_eq!(repo.increment("s1", day(15), "15012025", now).await.unwrap(), 2);
        assert_eq!(repo.increment("s1", day(16), "16012025", now).await.unwrap(), 1);
        assert_eq!(repo.increment("s2", day(15), "15012025", now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_distinct() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let repo = db.daily_counters();
                tokio::spawn(async move { repo.increment("s1", day(15), "15012025", now).await })
            })
            .collect();

        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap().unwrap());
        }
        numbers.sort();
        assert_eq!(numbers, (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_set_records_stamp_and_list_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.daily_counters();
        let now = Utc::now();

        repo.increment("s1", day(14), "14012025", now).await.unwrap();
        let fixed = repo
            .set("s1", day(15), "15012025", 7, CounterStamp::Fixed, now)
            .await
            .unwrap();
        assert_eq!(fixed.last_number, 7);
        assert!(fixed.fixed_at.is_some());
        assert!(fixed.reset_at.is_none());

        let reset = repo
            .set(
                "s1",
                day(15),
                "15012025",
                0,
                CounterStamp::Reset { by: "owner".into() },
                now,
            )
            .await
            .unwrap();
        assert_eq!(reset.last_number, 0);
        assert_eq!(reset.reset_by.as_deref(), Some("owner"));
        assert!(reset.fixed_at.is_some());

        let all = repo.list("s1").await.unwrap();
        assert_eq!(all[0].date, day(15));
        assert_eq!(all[1].date, day(14));

        let negative = repo
            .set("s1", day(15), "15012025", -1, CounterStamp::Fixed, now)
            .await
            .unwrap_err();
        assert!(matches!(negative, DbError::ConstraintViolation(_)));
    }
}
