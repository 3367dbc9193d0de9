//! # Invoice Repository
//!
//! Invoice storage and the atomic sale commit.
//!
//! ## Sale Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    commit_sale (one transaction)                        │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │   ├── invoice id already stored?  → ROLLBACK, AlreadyExists            │
//! │   ├── for each sold product:                                           │
//! │   │     UPDATE products SET stock, version + 1                         │
//! │   │     WHERE version = expected  → 0 rows? ROLLBACK, StockConflict    │
//! │   ├── INSERT invoices             → PK taken? ROLLBACK, AlreadyExists  │
//! │   └── INSERT ledger_outbox (one row per ledger entry)                  │
//! │  COMMIT                                                                │
//! │   └── publish product + invoice change events                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock and the invoice are therefore all-or-nothing, and stock for a given
//! invoice id is decremented at most once no matter how many devices try.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::repository::ledger_outbox::enqueue_in;
use crate::repository::product::update_stock_in;
use tally_core::{
    CartItem, Collection, DiscountType, Invoice, InvoiceCreator, InvoiceStatus, PaymentMode,
    Product, Quantity, StockHistory, UserRole,
};

// =============================================================================
// Sale Commit Types
// =============================================================================

/// One conditional stock write inside a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDecrement {
    pub product_id: String,
    /// Version the product had when its stock was read.
    pub expected_version: i64,
    pub new_stock: Quantity,
}

/// Everything a sale writes.
#[derive(Debug, Clone)]
pub struct SaleCommit<'a> {
    pub invoice: &'a Invoice,
    pub decrements: Vec<StockDecrement>,
    /// Ledger entries with ids and timestamps already assigned.
    pub ledger_entries: Vec<StockHistory>,
}

/// Result of [`InvoiceRepository::commit_sale`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Stock, invoice and outbox rows were committed.
    Committed {
        products: Vec<Product>,
        ledger_task_ids: Vec<String>,
    },
    /// The invoice id was already stored; nothing was written.
    AlreadyExists,
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: String,
    customer_name: String,
    customer_phone: Option<String>,
    customer_address: Option<String>,
    items_json: String,
    subtotal_cents: i64,
    total_vat_cents: i64,
    discount_cents: i64,
    discount_type: Option<DiscountType>,
    discount_bps: Option<u32>,
    grand_total_cents: i64,
    paid_amount_cents: i64,
    due_amount_cents: i64,
    date: DateTime<Utc>,
    created_at: Option<DateTime<Utc>>,
    status: InvoiceStatus,
    payment_mode: PaymentMode,
    created_by_name: Option<String>,
    created_by_role: Option<UserRole>,
    pdf_url: Option<String>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DbError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let items: Vec<CartItem> = serde_json::from_str(&row.items_json)?;
        let created_by = row.created_by_name.map(|name| InvoiceCreator {
            name,
            role: row.created_by_role.unwrap_or_default(),
        });

        Ok(Invoice {
            id: row.id,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            customer_address: row.customer_address,
            items,
            subtotal_cents: row.subtotal_cents,
            total_vat_cents: row.total_vat_cents,
            discount_cents: row.discount_cents,
            discount_type: row.discount_type,
            discount_bps: row.discount_bps,
            grand_total_cents: row.grand_total_cents,
            paid_amount_cents: row.paid_amount_cents,
            due_amount_cents: row.due_amount_cents,
            date: row.date,
            created_at: row.created_at,
            status: row.status,
            payment_mode: row.payment_mode,
            created_by,
            pdf_url: row.pdf_url,
        })
    }
}

/// Plain INSERT; a duplicate id surfaces as `UniqueViolation`.
async fn insert_in(
    conn: &mut SqliteConnection,
    store_id: &str,
    invoice: &Invoice,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let items_json = serde_json::to_string(&invoice.items)?;

    sqlx::query(
        r#"
        INSERT INTO invoices (
            store_id, id, customer_name, customer_phone, customer_address, items_json,
            subtotal_cents, total_vat_cents, discount_cents, discount_type, discount_bps,
            grand_total_cents, paid_amount_cents, due_amount_cents, date, created_at,
            status, payment_mode, created_by_name, created_by_role, pdf_url, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(store_id)
    .bind(&invoice.id)
    .bind(&invoice.customer_name)
    .bind(&invoice.customer_phone)
    .bind(&invoice.customer_address)
    .bind(&items_json)
    .bind(invoice.subtotal_cents)
    .bind(invoice.total_vat_cents)
    .bind(invoice.discount_cents)
    .bind(invoice.discount_type)
    .bind(invoice.discount_bps)
    .bind(invoice.grand_total_cents)
    .bind(invoice.paid_amount_cents)
    .bind(invoice.due_amount_cents)
    .bind(invoice.date)
    .bind(invoice.created_at)
    .bind(invoice.status)
    .bind(invoice.payment_mode)
    .bind(invoice.created_by.as_ref().map(|c| c.name.clone()))
    .bind(invoice.created_by.as_ref().map(|c| c.role))
    .bind(&invoice.pdf_url)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn exists_in(conn: &mut SqliteConnection, store_id: &str, id: &str) -> DbResult<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM invoices WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for invoice database operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl InvoiceRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        InvoiceRepository { pool, feed }
    }

    /// All invoices of a store, newest first.
    pub async fn list(&self, store_id: &str) -> DbResult<Vec<Invoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            "SELECT * FROM invoices WHERE store_id = ? ORDER BY date DESC, id DESC",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        let mut invoices = rows
            .into_iter()
            .map(Invoice::try_from)
            .collect::<DbResult<Vec<_>>>()?;
        invoices.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));

        debug!(store_id = %store_id, count = invoices.len(), "Listed invoices");
        Ok(invoices)
    }

    pub async fn get(&self, store_id: &str, id: &str) -> DbResult<Option<Invoice>> {
        let row =
            sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE store_id = ? AND id = ?")
                .bind(store_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Invoice::try_from).transpose()
    }

    pub async fn exists(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        exists_in(&mut conn, store_id, id).await
    }

    /// Every invoice id in the store starting with `prefix`.
    ///
    /// Compared literally: `%`, `_` and `\` in the prefix match only themselves.
    pub async fn ids_with_prefix(&self, store_id: &str, prefix: &str) -> DbResult<Vec<String>> {
        let len = prefix.chars().count() as i64;
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM invoices WHERE store_id = ? AND substr(id, 1, ?) = ?",
        )
        .bind(store_id)
        .bind(len)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Saves an invoice record without touching stock.
    ///
    /// An existing record keeps its stock-relevant snapshot (`items`, totals,
    /// `date`, `created_by`); only metadata fields are updated.
    pub async fn upsert(&self, store_id: &str, invoice: &Invoice, now: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        if exists_in(&mut *tx, store_id, &invoice.id).await? {
            sqlx::query(
                r#"
                UPDATE invoices SET
                    customer_name = ?, customer_phone = ?, customer_address = ?,
                    paid_amount_cents = ?, due_amount_cents = ?, status = ?,
                    payment_mode = ?, pdf_url = ?, updated_at = ?
                WHERE store_id = ? AND id = ?
                "#,
            )
            .bind(&invoice.customer_name)
            .bind(&invoice.customer_phone)
            .bind(&invoice.customer_address)
            .bind(invoice.paid_amount_cents)
            .bind(invoice.due_amount_cents)
            .bind(invoice.status)
            .bind(invoice.payment_mode)
            .bind(&invoice.pdf_url)
            .bind(now)
            .bind(store_id)
            .bind(&invoice.id)
            .execute(&mut *tx)
            .await?;
        } else {
            insert_in(&mut *tx, store_id, invoice, now).await?;
        }

        tx.commit().await?;

        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Invoices, &invoice.id));
        Ok(())
    }

    /// Deletes the invoice record. Stock is not restored.
    pub async fn delete(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(store_id = %store_id, invoice_id = %id, "Invoice deleted");
            self.feed
                .publish(ChangeEvent::deleted(store_id, Collection::Invoices, id));
        }
        Ok(deleted)
    }

    /// Commits a sale atomically.
    ///
    /// ## Errors
    /// * `StockConflict` - A product's version moved; nothing was written
    pub async fn commit_sale(
        &self,
        store_id: &str,
        sale: SaleCommit<'_>,
        now: DateTime<Utc>,
    ) -> DbResult<CommitOutcome> {
        let invoice = sale.invoice;
        let mut tx = self.pool.begin().await?;

        if exists_in(&mut *tx, store_id, &invoice.id).await? {
            tx.rollback().await?;
            debug!(invoice_id = %invoice.id, "Invoice already stored, skipping sale commit");
            return Ok(CommitOutcome::AlreadyExists);
        }

        let mut products = Vec::with_capacity(sale.decrements.len());
        for dec in &sale.decrements {
            let updated = update_stock_in(
                &mut *tx,
                store_id,
                &dec.product_id,
                dec.expected_version,
                dec.new_stock,
                now,
            )
            .await?;

            match updated {
                Some(product) => products.push(product),
                None => {
                    tx.rollback().await?;
                    warn!(
                        invoice_id = %invoice.id,
                        product_id = %dec.product_id,
                        expected_version = dec.expected_version,
                        "Stock changed during sale commit"
                    );
                    return Err(DbError::StockConflict {
                        product_id: dec.product_id.clone(),
                        expected_version: dec.expected_version,
                    });
                }
            }
        }

        match insert_in(&mut *tx, store_id, invoice, now).await {
            Ok(()) => {}
            Err(DbError::UniqueViolation { .. }) => {
                tx.rollback().await?;
                warn!(invoice_id = %invoice.id, "Invoice id taken concurrently");
                return Ok(CommitOutcome::AlreadyExists);
            }
            Err(e) => return Err(e),
        }

        let mut ledger_task_ids = Vec::with_capacity(sale.ledger_entries.len());
        for entry in &sale.ledger_entries {
            ledger_task_ids.push(enqueue_in(&mut *tx, entry, now).await?);
        }

        tx.commit().await?;

        info!(
            store_id = %store_id,
            invoice_id = %invoice.id,
            products = products.len(),
            ledger_tasks = ledger_task_ids.len(),
            "Sale committed"
        );

        self.feed.publish_all(
            products
                .iter()
                .map(|p| ChangeEvent::upserted(store_id, Collection::Products, &p.id).for_product(&p.id)),
        );
        self.feed
            .publish(ChangeEvent::upserted(store_id, Collection::Invoices, &invoice.id));

        Ok(CommitOutcome::Committed {
            products,
            ledger_task_ids,
        })
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
    use chrono::{TimeDelta, TimeZone};
    use tally_core::{NewStockEntry, ProductKind, StockChangeType};

    fn product(id: &str, stock: i64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Item {}", id),
            barcode: None,
            category: "wash".to_string(),
            price_cents: 500,
            purchase_price_cents: None,
            vat_bps: 0,
            stock: Quantity::units(stock),
            unit: "pc".to_string(),
            kind: ProductKind::Product,
            image_url: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    fn invoice(id: &str, date: DateTime<Utc>, items: Vec<CartItem>) -> Invoice {
        Invoice {
            id: id.to_string(),
            customer_name: "Walk-in".to_string(),
            customer_phone: None,
            customer_address: None,
            items,
            subtotal_cents: 1000,
            total_vat_cents: 0,
            discount_cents: 0,
            discount_type: None,
            discount_bps: None,
            grand_total_cents: 1000,
            paid_amount_cents: 1000,
            due_amount_cents: 0,
            date,
            created_at: Some(date),
            status: InvoiceStatus::Pending,
            payment_mode: PaymentMode::Cash,
            created_by: Some(InvoiceCreator {
                name: "Mina".to_string(),
                role: UserRole::Cashier,
            }),
            pdf_url: None,
        }
    }

    fn sale<'a>(inv: &'a Invoice, p: &Product, qty: i64, now: DateTime<Utc>) -> SaleCommit<'a> {
        let qty = Quantity::units(qty);
        let entry = NewStockEntry::transition(
            p,
            StockChangeType::Sale,
            p.stock,
            p.stock - qty,
            format!("Invoice {}", inv.id),
            inv.performer_name(),
            inv.performer_role(),
            Some(inv.id.clone()),
        );
        SaleCommit {
            invoice: inv,
            decrements: vec![StockDecrement {
                product_id: p.id.clone(),
                expected_version: p.version,
                new_stock: p.stock - qty,
            }],
            ledger_entries: vec![materialize("s1", &entry, now)],
        }
    }

    #[tokio::test]
    async fn test_commit_sale_writes_everything() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let p = db.products().upsert("s1", &product("p1", 10), now).await.unwrap();
        let inv = invoice("INV-15012025-001", now, vec![CartItem::from_product(&p, Quantity::units(2))]);

        let outcome = db
            .invoices()
            .commit_sale("s1", sale(&inv, &p, 2, now), now)
            .await
            .unwrap();

        match outcome {
            CommitOutcome::Committed {
                products,
                ledger_task_ids,
            } => {
                assert_eq!(products[0].stock, Quantity::units(8));
                assert_eq!(ledger_task_ids.len(), 1);
            }
            CommitOutcome::AlreadyExists => panic!("expected commit"),
        }

        let stored = db.invoices().get("s1", &inv.id).await.unwrap().unwrap();
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.performer_name(), "Mina");
        assert_eq!(db.ledger_outbox().count_pending(Some("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_sale_twice_decrements_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let p = db.products().upsert("s1", &product("p1", 10), now).await.unwrap();
        let inv = invoice("INV-15012025-001", now, vec![CartItem::from_product(&p, Quantity::units(3))]);

        db.invoices()
            .commit_sale("s1", sale(&inv, &p, 3, now), now)
            .await
            .unwrap();
        let fresh = db.products().get("s1", "p1").await.unwrap().unwrap();
        let second = db
            .invoices()
            .commit_sale("s1", sale(&inv, &fresh, 3, now), now)
            .await
            .unwrap();

        assert_eq!(second, CommitOutcome::AlreadyExists);
        assert_eq!(db.products().get("s1", "p1").await.unwrap().unwrap().stock, Quantity::units(7));
        assert_eq!(db.ledger_outbox().count_pending(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_rolls_back_whole_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let a = db.products().upsert("s1", &product("a", 10), now).await.unwrap();
        let b = db.products().upsert("s1", &product("b", 10), now).await.unwrap();
        // Someone else sells b first
        db.products().upsert("s1", &product("b", 9), now).await.unwrap();

        let inv = invoice(
            "INV-15012025-002",
            now,
            vec![CartItem::from_product(&a, Quantity::units(1)), CartItem::from_product(&b, Quantity::units(1))],
        );
        let mut commit = sale(&inv, &a, 1, now);
        commit.decrements.push(StockDecrement {
            product_id: "b".to_string(),
            expected_version: b.version,
            new_stock: Quantity::units(9),
        });

        let err = db.invoices().commit_sale("s1", commit, now).await.unwrap_err();
        assert!(matches!(err, DbError::StockConflict { ref product_id, .. } if product_id == "b"));

        assert_eq!(db.products().get("s1", "a").await.unwrap().unwrap().stock, Quantity::units(10));
        assert!(!db.invoices().exists("s1", &inv.id).await.unwrap());
        assert_eq!(db.ledger_outbox().count_pending(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_existing_only_touches_metadata() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let p = product("p1", 5);
        let inv = invoice("INV-15012025-003", now, vec![CartItem::from_product(&p, Quantity::units(1))]);
        db.invoices().upsert("s1", &inv, now).await.unwrap();

        let mut changed = inv.clone();
        changed.status = InvoiceStatus::Delivered;
        changed.items.clear();
        changed.grand_total_cents = 1;
        db.invoices().upsert("s1", &changed, now).await.unwrap();

        let stored = db.invoices().get("s1", &inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Delivered);
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.grand_total_cents, 1000);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_prefix_scan() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        let repo = db.invoices();

        repo.upsert("s1", &invoice("INV-15012025-001", t0, vec![]), t0).await.unwrap();
        repo.upsert("s1", &invoice("INV-15012025-002", t0 + TimeDelta::hours(2), vec![]), t0)
            .await
            .unwrap();
        repo.upsert("s1", &invoice("INV-14012025-009", t0 - TimeDelta::days(1), vec![]), t0)
            .await
            .unwrap();

        let list = repo.list("s1").await.unwrap();
        assert_eq!(list[0].id, "INV-15012025-002");
        assert_eq!(list[2].id, "INV-14012025-009");

        let mut ids = repo.ids_with_prefix("s1", "INV-15012025-").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["INV-15012025-001", "INV-15012025-002"]);

        assert!(repo.delete("s1", "INV-15012025-001").await.unwrap());
        assert_eq!(repo.list("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_scan_treats_wildcards_literally() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        let repo = db.invoices();

        for id in ["INV-15012025-001", "INV%1", "INV_1", "INVX1", "INV\\1"] {
            repo.upsert("s1", &invoice(id, t0, vec![]), t0).await.unwrap();
        }

        assert_eq!(repo.ids_with_prefix("s1", "INV%").await.unwrap(), vec!["INV%1"]);
        assert_eq!(repo.ids_with_prefix("s1", "INV_").await.unwrap(), vec!["INV_1"]);
        assert_eq!(repo.ids_with_prefix("s1", "INV\\").await.unwrap(), vec!["INV\\1"]);
        assert!(repo.ids_with_prefix("s1", "INV-16").await.unwrap().is_empty());
        assert!(repo.ids_with_prefix("s2", "INV").await.unwrap().is_empty());
    }
}
