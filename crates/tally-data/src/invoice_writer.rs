//! # Inventory-Aware Invoice Writer
//!
//! Saves an invoice and deducts the stock it sold, exactly once.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │            save_invoice_with_stock_update(store, invoice)               │
//! │                                                                         │
//! │  1. Role must hold CreateInvoice                                       │
//! │  2. Invoice id already stored? ──yes──► metadata-only save, done       │
//! │  3. Stock management off?      ──yes──► save invoice only, done        │
//! │                                                                         │
//! │  ┌─────────────── retried (1s, 2s) on transient errors ─────────────┐  │
//! │  │ 4. Read every sold product in parallel (join_all)               │  │
//! │  │ 5. Validate: stock >= quantity for every line, else             │  │
//! │  │    "Insufficient stock for X. Available: a, Requested: q"       │  │
//! │  │ 6. One transaction:                                             │  │
//! │  │      UPDATE products ... WHERE version = read version           │  │
//! │  │      INSERT invoices                                            │  │
//! │  │      INSERT ledger_outbox (one task per line)                   │  │
//! │  │    version moved → StockConflict → back to 4                    │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  7. Deliver ledger tasks now (failures stay queued for the worker)     │
//! │  8. Patch products cache, upsert invoice into invoices cache           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines whose product no longer exists are sold without touching stock.
//! Several lines of the same product are deducted together; each line
//! still gets its own ledger entry.

use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use tally_core::validation::validate_invoice;
use tally_core::{
    permissions, Capability, CartItem, Collection, CoreError, Invoice, NewStockEntry, Product,
    Quantity, StockChangeType,
};
use tally_db::{materialize, CommitOutcome, Database, SaleCommit, StockDecrement};

use crate::cache::Cache;
use crate::clock::SharedClock;
use crate::error::DataResult;
use crate::outbox::LedgerDelivery;
use crate::retry::RetryPolicy;

/// What a sale actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleReceipt {
    pub invoice_id: String,
    /// Whether product stock was decremented by this call.
    pub stock_deducted: bool,
    /// Outbox tasks carrying the sale's ledger entries.
    pub ledger_tasks: Vec<String>,
}

impl SaleReceipt {
    fn without_stock(invoice_id: &str) -> Self {
        SaleReceipt {
            invoice_id: invoice_id.to_string(),
            stock_deducted: false,
            ledger_tasks: Vec::new(),
        }
    }
}

/// Units sold of one product across all invoice lines.
struct ProductSale<'a> {
    product: Product,
    lines: Vec<&'a CartItem>,
}

impl ProductSale<'_> {
    fn quantity(&self) -> Quantity {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceWriter {
    db: Database,
    cache: Cache,
    clock: SharedClock,
    retry: RetryPolicy,
    delivery: LedgerDelivery,
}

impl InvoiceWriter {
    pub fn new(
        db: Database,
        cache: Cache,
        clock: SharedClock,
        retry: RetryPolicy,
        delivery: LedgerDelivery,
    ) -> Self {
        InvoiceWriter {
            db,
            cache,
            clock,
            retry,
            delivery,
        }
    }

    /// Persists `invoice` and deducts its stock atomically.
    ///
    /// ## Errors
    /// * `PermissionDenied` - Creator's role may not sell
    /// * `InsufficientStock` - A line asks for more than is on hand;
    ///   nothing was written
    /// * Database errors once retries are exhausted
    pub async fn save_invoice_with_stock_update(
        &self,
        store_id: &str,
        invoice: &Invoice,
    ) -> DataResult<SaleReceipt> {
        permissions::require(invoice.performer_role(), Capability::CreateInvoice)?;
        validate_invoice(invoice)?;

        if self.db.invoices().exists(store_id, &invoice.id).await? {
            info!(
                store_id = %store_id,
                invoice_id = %invoice.id,
                "Invoice already stored, saving metadata only"
            );
            self.db
                .invoices()
                .upsert(store_id, invoice, self.clock.now())
                .await?;
            self.sync_invoice_cache(store_id, invoice).await;
            return Ok(SaleReceipt::without_stock(&invoice.id));
        }

        if !self.stock_management_enabled(store_id).await {
            debug!(store_id = %store_id, invoice_id = %invoice.id, "Stock management disabled");
            self.retry
                .run("save_invoice", |_| self.commit_without_stock(store_id, invoice))
                .await?;
            self.sync_invoice_cache(store_id, invoice).await;
            return Ok(SaleReceipt::without_stock(&invoice.id));
        }

        let outcome = self
            .retry
            .run("commit_sale", |attempt| self.commit_once(store_id, invoice, attempt))
            .await?;

        let (products, ledger_tasks) = match outcome {
            CommitOutcome::Committed {
                products,
                ledger_task_ids,
            } => (products, ledger_task_ids),
            CommitOutcome::AlreadyExists => {
                // Another device stored this id between the check and the commit.
                self.sync_invoice_cache(store_id, invoice).await;
                return Ok(SaleReceipt::without_stock(&invoice.id));
            }
        };

        let report = self.delivery.deliver(&ledger_tasks).await;
        if report.failed > 0 {
            warn!(
                invoice_id = %invoice.id,
                failed = report.failed,
                "Ledger entries left queued for the outbox worker"
            );
        }

        let stock: HashMap<&str, Quantity> = products.iter().map(|p| (p.id.as_str(), p.stock)).collect();
        self.cache
            .map_items::<Product, _>(store_id, Collection::Products, |p| {
                if let Some(&level) = stock.get(p.id.as_str()) {
                    p.stock = level;
                }
            })
            .await;
        self.sync_invoice_cache(store_id, invoice).await;

        info!(
            store_id = %store_id,
            invoice_id = %invoice.id,
            products = products.len(),
            ledger_tasks = ledger_tasks.len(),
            "Sale saved"
        );

        Ok(SaleReceipt {
            invoice_id: invoice.id.clone(),
            stock_deducted: true,
            ledger_tasks,
        })
    }

    /// Settings toggle; unreadable settings count as enabled.
    async fn stock_management_enabled(&self, store_id: &str) -> bool {
        match self.db.settings().get(store_id).await {
            Ok(settings) => settings.stock_management_enabled(),
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Settings unreadable, assuming stock management");
                true
            }
        }
    }

    async fn commit_without_stock(&self, store_id: &str, invoice: &Invoice) -> DataResult<CommitOutcome> {
        let sale = SaleCommit {
            invoice,
            decrements: Vec::new(),
            ledger_entries: Vec::new(),
        };
        Ok(self.db.invoices().commit_sale(store_id, sale, self.clock.now()).await?)
    }

    /// Read, validate and commit. Runs again from the top on retry.
    async fn commit_once(
        &self,
        store_id: &str,
        invoice: &Invoice,
        attempt: u32,
    ) -> DataResult<CommitOutcome> {
        let sales = self.read_products(store_id, invoice).await?;
        self.commit_sales(store_id, invoice, sales, attempt).await
    }

    /// Validates `sales` as read and commits them conditionally on the
    /// versions seen by that read.
    async fn commit_sales(
        &self,
        store_id: &str,
        invoice: &Invoice,
        sales: Vec<ProductSale<'_>>,
        attempt: u32,
    ) -> DataResult<CommitOutcome> {
        for sale in &sales {
            let requested = sale.quantity();
            if sale.product.stock < requested {
                return Err(CoreError::InsufficientStock {
                    product: sale.lines[0].name.clone(),
                    available: sale.product.stock,
                    requested,
                }
                .into());
            }
        }

        let now = self.clock.now();
        let mut decrements = Vec::with_capacity(sales.len());
        let mut ledger_entries = Vec::with_capacity(invoice.items.len());

        for sale in &sales {
            let mut level = sale.product.stock;
            for line in &sale.lines {
                let mut entry = NewStockEntry::transition(
                    &sale.product,
                    StockChangeType::Sale,
                    level,
                    level - line.quantity,
                    format!("Invoice {}", invoice.id),
                    invoice.performer_name(),
                    invoice.performer_role(),
                    Some(invoice.id.clone()),
                );
                entry.product_name = line.name.clone();
                entry.barcode = line.barcode.clone();
                ledger_entries.push(materialize(store_id, &entry, now));
                level -= line.quantity;
            }

            decrements.push(StockDecrement {
                product_id: sale.product.id.clone(),
                expected_version: sale.product.version,
                new_stock: level,
            });
        }

        debug!(
            invoice_id = %invoice.id,
            attempt,
            products = decrements.len(),
            "Committing sale"
        );

        let sale = SaleCommit {
            invoice,
            decrements,
            ledger_entries,
        };
        Ok(self.db.invoices().commit_sale(store_id, sale, now).await?)
    }

    /// Current state of every product sold, grouped by product, in line order.
    async fn read_products<'a>(
        &self,
        store_id: &str,
        invoice: &'a Invoice,
    ) -> DataResult<Vec<ProductSale<'a>>> {
        let mut order: Vec<&str> = Vec::new();
        let mut lines: HashMap<&str, Vec<&'a CartItem>> = HashMap::new();
        for item in &invoice.items {
            let key = item.product_id.as_str();
            lines
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(item);
        }

        let products = self.db.products();
        let reads = join_all(order.iter().map(|id| products.get(store_id, id))).await;

        let mut sales = Vec::with_capacity(order.len());
        for (id, read) in order.into_iter().zip(reads) {
            match read? {
                Some(product) => sales.push(ProductSale {
                    product,
                    lines: lines.remove(id).unwrap_or_default(),
                }),
                None => {
                    warn!(store_id = %store_id, product_id = %id, "Sold product not found, stock untouched");
                }
            }
        }
        Ok(sales)
    }

    /// Puts the stored copy of `invoice` into the invoices cache. The stored
    /// row wins over the caller's copy: saves of an existing id only touch
    /// its metadata.
    pub(crate) async fn sync_invoice_cache(&self, store_id: &str, invoice: &Invoice) {
        let stored = match self.db.invoices().get(store_id, &invoice.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => invoice.clone(),
            Err(e) => {
                warn!(invoice_id = %invoice.id, error = %e, "Could not re-read invoice for cache");
                self.cache.invalidate(store_id, Collection::Invoices).await;
                return;
            }
        };
        self.cache
            .upsert_item(store_id, Collection::Invoices, &stored)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use crate::testing::{self, Fixture};
    use tally_core::{
        BusinessSettings, InvoiceCreator, InvoiceStatus, InvoiceTotals, StockHistoryFilter,
        UserRole,
    };

    fn writer(fx: &Fixture) -> InvoiceWriter {
        InvoiceWriter::new(
            fx.db.clone(),
            fx.cache.clone(),
            fx.shared_clock(),
            RetryPolicy::default(),
            LedgerDelivery::new(fx.db.clone(), fx.shared_clock()),
        )
    }

    async fn stock_of(fx: &Fixture, id: &str) -> Quantity {
        fx.db.products().get("s1", id).await.unwrap().unwrap().stock
    }

    fn units(n: i64) -> Quantity {
        Quantity::units(n)
    }

    #[tokio::test]
    async fn test_end_to_end_sale() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Garment Bag", 10)).await;
        fx.cache.put("s1", Collection::Products, &[p.clone()]).await;

        let invoice = testing::invoice("INV-01012025-001", &[(&p, 3)]);
        let receipt = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();

        assert!(receipt.stock_deducted);
        assert_eq!(receipt.ledger_tasks.len(), 1);
        assert_eq!(stock_of(&fx, "p1").await, units(7));

        let history = fx
            .db
            .stock_history()
            .query("s1", &StockHistoryFilter::for_product("p1"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.change_type, StockChangeType::Sale);
        assert_eq!(
            (entry.quantity, entry.previous_stock, entry.new_stock),
            (units(-3), units(10), units(7))
        );
        assert_eq!(entry.reference_id.as_deref(), Some("INV-01012025-001"));
        assert_eq!(entry.reason.as_deref(), Some("Invoice INV-01012025-001"));
        assert_eq!(entry.performed_by, "Mina");
        assert_eq!(entry.performed_by_role, UserRole::Cashier);

        let stored = fx.db.invoices().get("s1", "INV-01012025-001").await.unwrap().unwrap();
        assert_eq!(stored.items, invoice.items);
        assert!(InvoiceTotals::of_invoice(&stored).matches(&stored));
        assert_eq!(stored.grand_total_cents, 1500);

        let cached = fx.cache.get::<Product>("s1", Collection::Products).await.unwrap();
        assert_eq!(cached[0].stock, units(7));
        let cached = fx.cache.get::<Invoice>("s1", Collection::Invoices).await;
        assert!(cached.is_none(), "invoices were never listed, so nothing to patch");
    }

    #[tokio::test]
    async fn test_same_invoice_twice_deducts_once() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        let writer = writer(&fx);
        let mut invoice = testing::invoice("INV-01012025-001", &[(&p, 4)]);

        writer.save_invoice_with_stock_update("s1", &invoice).await.unwrap();
        assert_eq!(stock_of(&fx, "p1").await, units(6));

        invoice.status = InvoiceStatus::Delivered;
        let receipt = writer.save_invoice_with_stock_update("s1", &invoice).await.unwrap();
        assert!(!receipt.stock_deducted);
        assert!(receipt.ledger_tasks.is_empty());
        assert_eq!(stock_of(&fx, "p1").await, units(6));
        assert_eq!(fx.db.stock_history().count("s1").await.unwrap(), 1);

        let stored = fx.db.invoices().get("s1", "INV-01012025-001").await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Delivered);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let fx = Fixture::new().await;
        let a = fx.stock("s1", &testing::product("a", "Hanger", 5)).await;
        let b = fx.stock("s1", &testing::product("b", "Fabric Softener", 3)).await;

        let invoice = testing::invoice("INV-01012025-001", &[(&a, 2), (&b, 10)]);
        let err = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Insufficient stock for Fabric Softener. Available: 3, Requested: 10"
        );
        assert!(err.is_user_facing());
        assert_eq!(stock_of(&fx, "a").await, units(5));
        assert_eq!(stock_of(&fx, "b").await, units(3));
        assert!(!fx.db.invoices().exists("s1", "INV-01012025-001").await.unwrap());
        assert_eq!(fx.db.ledger_outbox().count_pending(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stock_management_disabled() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Duvet Cover", 0)).await;
        fx.db
            .settings()
            .merge(
                "s1",
                &BusinessSettings {
                    stock_management_enabled: Some(false),
                    ..Default::default()
                },
                testing::start(),
            )
            .await
            .unwrap();

        let invoice = testing::invoice("INV-01012025-001", &[(&p, 5)]);
        let receipt = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();

        assert!(!receipt.stock_deducted);
        assert_eq!(stock_of(&fx, "p1").await, units(0));
        let stored = fx.db.invoices().get("s1", "INV-01012025-001").await.unwrap().unwrap();
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].quantity, units(5));
        assert_eq!(fx.db.stock_history().count("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_lines_deduct_together() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;

        let invoice = testing::invoice("INV-01012025-001", &[(&p, 2), (&p, 3)]);
        writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();

        assert_eq!(stock_of(&fx, "p1").await, units(5));
        let mut history = fx
            .db
            .stock_history()
            .query("s1", &StockHistoryFilter::all())
            .await
            .unwrap();
        history.sort_by_key(|e| std::cmp::Reverse(e.previous_stock));
        let steps: Vec<(Quantity, Quantity)> = history.iter().map(|e| (e.previous_stock, e.new_stock)).collect();
        assert_eq!(steps, vec![(units(10), units(8)), (units(8), units(5))]);

        let over = testing::invoice("INV-01012025-002", &[(&p, 3), (&p, 3)]);
        let err = writer(&fx)
            .save_invoice_with_stock_update("s1", &over)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Hanger. Available: 5, Requested: 6"
        );
    }

    #[tokio::test]
    async fn test_missing_product_is_skipped() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        let gone = testing::product("gone", "Old Stock", 0);

        let invoice = testing::invoice("INV-01012025-001", &[(&p, 1), (&gone, 2)]);
        let receipt = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();

        assert_eq!(receipt.ledger_tasks.len(), 1);
        assert_eq!(stock_of(&fx, "p1").await, units(9));
    }

    #[tokio::test]
    async fn test_salesman_may_sell_but_role_is_checked() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        let mut invoice = testing::invoice("INV-01012025-001", &[(&p, 1)]);
        invoice.created_by = Some(InvoiceCreator {
            name: "Karim".into(),
            role: UserRole::Salesman,
        });
        assert!(writer(&fx).save_invoice_with_stock_update("s1", &invoice).await.is_ok());

        invoice.id = "not-an-invoice".into();
        let err = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invoice_cache_is_patched_when_listed() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        fx.cache.put::<Invoice>("s1", Collection::Invoices, &[]).await;

        let invoice = testing::invoice("INV-01012025-001", &[(&p, 1)]);
        writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();

        let cached = fx.cache.get::<Invoice>("s1", Collection::Invoices).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "INV-01012025-001");
    }

    #[tokio::test]
    async fn test_weighed_sale_deducts_fraction() {
        let fx = Fixture::new().await;
        let mut detergent = testing::product("p1", "Loose Detergent", 10);
        detergent.unit = "kg".to_string();
        detergent.price_cents = 400;
        let p = fx.stock("s1", &detergent).await;

        let invoice = testing::invoice_of(
            "INV-01012025-001",
            vec![CartItem::from_product(&p, Quantity::from_milli(2_500))],
        );
        let receipt = writer(&fx)
            .save_invoice_with_stock_update("s1", &invoice)
            .await
            .unwrap();
        assert!(receipt.stock_deducted);
        assert_eq!(stock_of(&fx, "p1").await, Quantity::from_milli(7_500));

        let history = fx
            .db
            .stock_history()
            .query("s1", &StockHistoryFilter::for_product("p1"))
            .await
            .unwrap();
        assert_eq!(history[0].quantity, Quantity::from_milli(-2_500));
        assert_eq!(history[0].unit.as_deref(), Some("kg"));
        assert!(history[0].is_balanced());

        let stored = fx.db.invoices().get("s1", "INV-01012025-001").await.unwrap().unwrap();
        assert_eq!(stored.items[0].quantity, Quantity::from_milli(2_500));
        assert_eq!(stored.grand_total_cents, 1_000);

        let over = testing::invoice_of(
            "INV-01012025-002",
            vec![CartItem::from_product(&p, units(8))],
        );
        let err = writer(&fx)
            .save_invoice_with_stock_update("s1", &over)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Loose Detergent. Available: 7.5, Requested: 8"
        );
    }

    /// Runs the writer's commit loop, letting another till sell from `p1`
    /// after the first attempt has read it.
    async fn commit_racing_other_till(
        fx: &Fixture,
        invoice: &Invoice,
        left_by_other_till: Quantity,
    ) -> (DataResult<CommitOutcome>, u32) {
        let writer = writer(fx);
        let other_till = fx.db.clone();
        let attempts = std::cell::Cell::new(0);

        let outcome = RetryPolicy::default()
            .run("commit_sale", |attempt| {
                let (writer, other_till, attempts) = (&writer, &other_till, &attempts);
                async move {
                    attempts.set(attempt);
                    let sales = writer.read_products("s1", invoice).await?;
                    if attempt == 1 {
                        let mut sold = sales[0].product.clone();
                        sold.stock = left_by_other_till;
                        other_till.products().upsert("s1", &sold, testing::start()).await?;
                    }
                    writer.commit_sales("s1", invoice, sales, attempt).await
                }
            })
            .await;
        (outcome, attempts.get())
    }

    #[tokio::test]
    async fn test_stock_moved_before_commit_is_reread() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        let invoice = testing::invoice("INV-01012025-001", &[(&p, 4)]);

        let (outcome, attempts) = commit_racing_other_till(&fx, &invoice, units(7)).await;

        assert_eq!(attempts, 2);
        match outcome.unwrap() {
            CommitOutcome::Committed { products, .. } => assert_eq!(products[0].stock, units(3)),
            CommitOutcome::AlreadyExists => panic!("expected commit"),
        }
        assert_eq!(stock_of(&fx, "p1").await, units(3));

        // The entry is built from the second read, not the stale one
        LedgerDelivery::new(fx.db.clone(), fx.shared_clock())
            .drain_once(10, 5)
            .await
            .unwrap();
        let history = fx
            .db
            .stock_history()
            .query("s1", &StockHistoryFilter::for_product("p1"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            (history[0].previous_stock, history[0].new_stock),
            (units(7), units(3))
        );
    }

    #[tokio::test]
    async fn test_stock_taken_before_commit_fails_validation() {
        let fx = Fixture::new().await;
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 10)).await;
        let invoice = testing::invoice("INV-01012025-001", &[(&p, 4)]);

        let (outcome, attempts) = commit_racing_other_till(&fx, &invoice, units(2)).await;

        assert_eq!(attempts, 2);
        let err = outcome.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Hanger. Available: 2, Requested: 4"
        );
        assert_eq!(stock_of(&fx, "p1").await, units(2));
        assert!(!fx.db.invoices().exists("s1", "INV-01012025-001").await.unwrap());
        assert_eq!(fx.db.ledger_outbox().count_pending(None).await.unwrap(), 0);
    }
}
