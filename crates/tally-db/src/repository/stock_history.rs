//! # Stock History Repository
//!
//! The append-only stock ledger.
//!
//! ## Ledger Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     stock_history (append-only)                         │
//! │                                                                         │
//! │  INSERT  ✅  new_stock = previous_stock + quantity (CHECK constraint)   │
//! │  UPDATE  ❌  trigger raises 'stock_history is append-only'              │
//! │  DELETE  ❌  trigger raises 'stock_history is append-only'              │
//! │                                                                         │
//! │  id = stock_{epoch_millis}_{0..999}                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are written by three paths: a direct append (manual adjustments),
//! the product save transaction, and the ledger outbox after a sale commit.
//! The last two go through [`insert_entry`] on a caller-owned connection.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::feed::{ChangeEvent, ChangeFeed};
use tally_core::{Collection, NewStockEntry, StockHistory, StockHistoryFilter};

/// Attempts at finding a free ledger id before giving up.
const ID_ATTEMPTS: usize = 5;

/// Generates a ledger id: `stock_{epoch_millis}_{random 0..999}`.
pub fn new_entry_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("stock_{}_{}", now.timestamp_millis(), suffix)
}

/// Ledger timestamps are kept at millisecond precision.
pub fn ledger_timestamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(now)
}

/// Assigns id, store and timestamp to a pending entry.
pub fn materialize(store_id: &str, entry: &NewStockEntry, now: DateTime<Utc>) -> StockHistory {
    StockHistory {
        id: new_entry_id(now),
        store_id: store_id.to_string(),
        product_id: entry.product_id.clone(),
        product_name: entry.product_name.clone(),
        barcode: entry.barcode.clone(),
        unit: entry.unit.clone(),
        change_type: entry.change_type,
        quantity: entry.quantity,
        previous_stock: entry.previous_stock,
        new_stock: entry.new_stock,
        reason: entry.reason.clone(),
        performed_by: entry.performed_by.clone(),
        performed_by_role: entry.performed_by_role,
        timestamp: ledger_timestamp(now),
        reference_id: entry.reference_id.clone(),
    }
}

/// Inserts a ledger entry on the given connection (usually a transaction).
///
/// If the generated id collides with an existing entry a fresh id is drawn.
/// Returns the id actually stored.
pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &StockHistory,
) -> DbResult<String> {
    let mut id = entry.id.clone();

    for _ in 0..ID_ATTEMPTS {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_history (
                store_id, id, product_id, product_name, barcode, unit,
                change_type, quantity, previous_stock, new_stock, reason,
                performed_by, performed_by_role, timestamp, reference_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.store_id)
        .bind(&id)
        .bind(&entry.product_id)
        .bind(&entry.product_name)
        .bind(&entry.barcode)
        .bind(&entry.unit)
        .bind(entry.change_type)
        .bind(entry.quantity)
        .bind(entry.previous_stock)
        .bind(entry.new_stock)
        .bind(&entry.reason)
        .bind(&entry.performed_by)
        .bind(entry.performed_by_role)
        .bind(entry.timestamp)
        .bind(&entry.reference_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::from);

        match result {
            Ok(_) => return Ok(id),
            Err(DbError::UniqueViolation { .. }) => {
                warn!(id = %id, "Ledger id collision, drawing a new one");
                id = new_entry_id(entry.timestamp);
            }
            Err(e) => return Err(e),
        }
    }

    Err(DbError::duplicate("stock_history.id", id))
}

/// Repository for the stock ledger.
#[derive(Debug, Clone)]
pub struct StockHistoryRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl StockHistoryRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        StockHistoryRepository { pool, feed }
    }

    /// Appends one entry and returns it as stored.
    pub async fn append(
        &self,
        store_id: &str,
        entry: &NewStockEntry,
        now: DateTime<Utc>,
    ) -> DbResult<StockHistory> {
        let mut stored = materialize(store_id, entry, now);

        let mut conn = self.pool.acquire().await?;
        stored.id = insert_entry(&mut conn, &stored).await?;
        drop(conn);

        debug!(
            store_id = %store_id,
            id = %stored.id,
            product_id = %stored.product_id,
            quantity = %stored.quantity,
            "Stock history appended"
        );

        self.feed.publish(
            ChangeEvent::upserted(store_id, Collection::StockHistory, &stored.id)
                .for_product(&stored.product_id),
        );
        Ok(stored)
    }

    /// Gets one entry by id.
    pub async fn get(&self, store_id: &str, id: &str) -> DbResult<Option<StockHistory>> {
        let entry = sqlx::query_as::<_, StockHistory>(
            "SELECT * FROM stock_history WHERE store_id = ? AND id = ?",
        )
        .bind(store_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Entries matching the filter, newest first.
    ///
    /// The product narrows the SQL scan; date bounds are applied on the
    /// decoded timestamps so they compare as instants, not strings.
    pub async fn query(
        &self,
        store_id: &str,
        filter: &StockHistoryFilter,
    ) -> DbResult<Vec<StockHistory>> {
        let rows = match &filter.product_id {
            Some(product_id) => {
                sqlx::query_as::<_, StockHistory>(
                    "SELECT * FROM stock_history WHERE store_id = ? AND product_id = ?",
                )
                .bind(store_id)
                .bind(product_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StockHistory>("SELECT * FROM stock_history WHERE store_id = ?")
                    .bind(store_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut entries: Vec<StockHistory> = rows.into_iter().filter(|e| filter.matches(e)).collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        debug!(store_id = %store_id, count = entries.len(), "Stock history query");
        Ok(entries)
    }

    /// Number of ledger entries for a store.
    pub async fn count(&self, store_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_history WHERE store_id = ?")
            .bind(store_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
