//! # Ledger Outbox Repository
//!
//! Ledger entries produced by a sale wait here until they are written to
//! `stock_history`.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ledger Outbox Flow                                │
//! │                                                                         │
//! │  1. Sale commit (one transaction)                                      │
//! │     ├── UPDATE products (version guarded)                              │
//! │     ├── INSERT invoices                                                │
//! │     └── INSERT ledger_outbox  ← one row per sold product               │
//! │                                                                         │
//! │  2. Delivery (one transaction per row)                                 │
//! │     ├── INSERT stock_history                                           │
//! │     └── UPDATE ledger_outbox SET delivered_at = now                    │
//! │                                                                         │
//! │  3. Failure                                                            │
//! │     └── attempts += 1, last_error = "...", row stays pending           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the ledger insert and the delivered flag commit together, a row
//! is written to the ledger at most once no matter how often delivery runs.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::repository::stock_history::insert_entry;
use tally_core::{Collection, StockHistory};

/// A pending or delivered ledger write.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTask {
    pub id: String,
    pub store_id: String,
    pub entry: StockHistory,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl LedgerTask {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

#[derive(Debug, FromRow)]
struct LedgerTaskRow {
    id: String,
    store_id: String,
    entry_json: String,
    attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    attempted_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerTaskRow> for LedgerTask {
    type Error = DbError;

    fn try_from(row: LedgerTaskRow) -> Result<Self, Self::Error> {
        Ok(LedgerTask {
            entry: serde_json::from_str(&row.entry_json)?,
            id: row.id,
            store_id: row.store_id,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            attempted_at: row.attempted_at,
            delivered_at: row.delivered_at,
        })
    }
}

/// Queues a ledger entry on the caller's transaction. Returns the task id.
pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    entry: &StockHistory,
    now: DateTime<Utc>,
) -> DbResult<String> {
    let id = Uuid::new_v4().to_string();
    let entry_json = serde_json::to_string(entry)?;

    sqlx::query(
        r#"
        INSERT INTO ledger_outbox (id, store_id, entry_json, attempts, created_at)
        VALUES (?, ?, ?, 0, ?)
        "#,
    )
    .bind(&id)
    .bind(&entry.store_id)
    .bind(&entry_json)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Repository for ledger outbox operations.
#[derive(Debug, Clone)]
pub struct LedgerOutboxRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl LedgerOutboxRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        LedgerOutboxRepository { pool, feed }
    }

    /// Queues a ledger entry outside of any sale.
    pub async fn enqueue(&self, entry: &StockHistory, now: DateTime<Utc>) -> DbResult<String> {
        let mut conn = self.pool.acquire().await?;
        enqueue_in(&mut conn, entry, now).await
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<LedgerTask>> {
        let row = sqlx::query_as::<_, LedgerTaskRow>("SELECT * FROM ledger_outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(LedgerTask::try_from).transpose()
    }

    /// Undelivered tasks, oldest first.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<LedgerTask>> {
        let rows = sqlx::query_as::<_, LedgerTaskRow>(
            r#"
            SELECT * FROM ledger_outbox
            WHERE delivered_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerTask::try_from).collect()
    }

    /// Writes the task's entry to the ledger and marks it delivered.
    ///
    /// ## Returns
    /// * `Ok(Some(entry))` - Delivered now; the entry as stored
    /// * `Ok(None)` - Already delivered earlier (nothing written)
    /// * `Err(NotFound)` - No such task
    pub async fn deliver(&self, task_id: &str, now: DateTime<Utc>) -> DbResult<Option<StockHistory>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LedgerTaskRow>("SELECT * FROM ledger_outbox WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("LedgerTask", task_id))?;

        let task = LedgerTask::try_from(row)?;
        if task.is_delivered() {
            tx.rollback().await?;
            debug!(task_id = %task_id, "Ledger task already delivered");
            return Ok(None);
        }

        let mut entry = task.entry;
        entry.id = insert_entry(&mut *tx, &entry).await?;

        sqlx::query(
            r#"
            UPDATE ledger_outbox
            SET delivered_at = ?, attempted_at = ?, attempts = attempts + 1, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            task_id = %task_id,
            entry_id = %entry.id,
            product_id = %entry.product_id,
            "Ledger task delivered"
        );

        self.feed.publish(
            ChangeEvent::upserted(&entry.store_id, Collection::StockHistory, &entry.id)
                .for_product(&entry.product_id),
        );
        Ok(Some(entry))
    }

    /// Records a failed delivery attempt.
    pub async fn mark_failed(&self, task_id: &str, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_outbox
            SET attempts = attempts + 1, last_error = ?, attempted_at = ?
            WHERE id = ? AND delivered_at IS NULL
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("LedgerTask", task_id));
        }

        warn!(task_id = %task_id, error = %error, "Ledger task delivery failed");
        Ok(())
    }

    /// Number of undelivered tasks, optionally for one store.
    pub async fn count_pending(&self, store_id: Option<&str>) -> DbResult<i64> {
        let count: i64 = match store_id {
            Some(store_id) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM ledger_outbox WHERE delivered_at IS NULL AND store_id = ?",
            )
            .bind(store_id)
            .fetch_one(&self.pool)
            .await?,
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM ledger_outbox WHERE delivered_at IS NULL")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Deletes delivered tasks older than `before`. Returns rows removed.
    pub async fn cleanup_delivered(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM ledger_outbox WHERE delivered_at IS NOT NULL AND delivered_at < ?",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Cleaned up delivered ledger tasks");
        }
        Ok(removed)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::stock_history::materialize;
    use chrono::TimeDelta;
    use tally_core::{NewStockEntry, Quantity, StockChangeType, StockHistoryFilter, UserRole};

    fn sale_entry(now: DateTime<Utc>) -> StockHistory {
        let pending = NewStockEntry {
            product_id: "p1".to_string(),
            product_name: "Curtain Wash".to_string(),
            barcode: Some("002".to_string()),
            unit: Some("pc".to_string()),
            change_type: StockChangeType::Sale,
            quantity: Quantity::from_milli(-1_500),
            previous_stock: Quantity::units(10),
            new_stock: Quantity::from_milli(8_500),
            reason: Some("Invoice INV-15012025-001".to_string()),
            performed_by: "Mina".to_string(),
            performed_by_role: UserRole::Cashier,
            reference_id: Some("INV-15012025-001".to_string()),
        };
        materialize("s1", &pending, now)
    }

    #[tokio::test]
    async fn test_deliver_is_exactly_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let outbox = db.ledger_outbox();
        let now = Utc::now();

        let task_id = outbox.enqueue(&sale_entry(now), now).await.unwrap();
        assert_eq!(outbox.count_pending(Some("s1")).await.unwrap(), 1);

        let first = outbox.deliver(&task_id, now).await.unwrap();
        assert!(first.is_some());
        let second = outbox.deliver(&task_id, now).await.unwrap();
        assert!(second.is_none());

        let ledger = db
            .stock_history()
            .query("s1", &StockHistoryFilter::all())
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reference_id.as_deref(), Some("INV-15012025-001"));
        assert_eq!(ledger[0].quantity, Quantity::from_milli(-1_500));
        assert_eq!(outbox.count_pending(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_task_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let outbox = db.ledger_outbox();
        let now = Utc::now();

        let task_id = outbox.enqueue(&sale_entry(now), now).await.unwrap();
        outbox.mark_failed(&task_id, "disk full", now).await.unwrap();

        let task = outbox.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("disk full"));
        assert!(!task.is_delivered());
        assert_eq!(outbox.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_delivered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let outbox = db.ledger_outbox();
        let now = Utc::now();

        let delivered = outbox.enqueue(&sale_entry(now), now).await.unwrap();
        outbox.enqueue(&sale_entry(now), now).await.unwrap();
        outbox.deliver(&delivered, now).await.unwrap();

        let removed = outbox
            .cleanup_delivered(now + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(outbox.count_pending(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deliver_unknown_task() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.ledger_outbox().deliver("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
