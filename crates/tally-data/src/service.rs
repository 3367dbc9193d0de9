//! # Data Service
//!
//! The single object the POS front end talks to. It wires the cache, the
//! ledger, numbering, the invoice writer and the push distributor around one
//! [`Database`], and owns the ledger outbox worker.
//!
//! ## Read Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cached Read-Through                                │
//! │                                                                         │
//! │  get_products(store)                                                   │
//! │       │                                                                 │
//! │       ├── cache.get(store, products)  ── fresh? ──► return             │
//! │       │                                                                 │
//! │       └── stale / missing                                              │
//! │             └── db.products().list(store)                              │
//! │                   ├── cache.put(store, products, list)                 │
//! │                   └── return list                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to the database first; the cache is patched afterwards and a
//! cache failure never fails the write.
//!
//! ## Usage
//! ```rust,ignore
//! let mut service = DataService::open(DataConfig::load_or_default(None)).await?;
//! service.start();
//!
//! let number = service.next_invoice_number("store-1").await;
//! let receipt = service.save_invoice_with_stock_update("store-1", &invoice).await?;
//!
//! service.shutdown().await;
//! ```

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::permissions::{self, Capability};
use tally_core::validation::validate_invoice;
use tally_core::{
    AttendanceRecord, BusinessSettings, Category, Collection, Customer, DailyCounter, Employee,
    Invoice, NewStockEntry, Product, SalaryRecord, StockHistory, StockHistoryFilter, UserRole,
};
use tally_db::{Database, DbResult};

use crate::cache::{Cache, CacheItem, CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::{CacheBackend, DataConfig};
use crate::distributor::{PushDistributor, Subscription};
use crate::error::{DataError, DataResult};
use crate::invoice_writer::{InvoiceWriter, SaleReceipt};
use crate::ledger::{Actor, StockAdjustment, StockLedger};
use crate::numbering::InvoiceNumbering;
use crate::outbox::{LedgerDelivery, LedgerOutboxHandle, LedgerOutboxProcessor};
use crate::retry::RetryPolicy;

// =============================================================================
// Data Service
// =============================================================================

pub struct DataService {
    config: DataConfig,
    db: Database,
    cache: Cache,
    clock: SharedClock,
    numbering: InvoiceNumbering,
    ledger: StockLedger,
    writer: InvoiceWriter,
    distributor: PushDistributor,
    delivery: LedgerDelivery,

    /// Outbox worker handle (set after start).
    outbox_handle: Option<LedgerOutboxHandle>,
}

impl DataService {
    /// Opens the database and cache named by `config`.
    pub async fn open(config: DataConfig) -> DataResult<Self> {
        config.validate()?;

        let db = Database::new(config.db_config()?).await?;
        let clock: SharedClock = Arc::new(SystemClock);

        let storage: Arc<dyn CacheStorage> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStorage::new()),
            CacheBackend::Sqlite => {
                let path = config
                    .cache_path()
                    .ok_or_else(|| DataError::InvalidConfig("No cache path available".into()))?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Arc::new(SqliteCacheStorage::open(&path).await?)
            }
        };
        let cache = Cache::new(storage, config.cache_ttl(), clock.clone());

        Ok(Self::new(config, db, cache, clock))
    }

    /// Assembles a service from already opened parts.
    pub fn new(config: DataConfig, db: Database, cache: Cache, clock: SharedClock) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let delivery = LedgerDelivery::new(db.clone(), clock.clone());

        DataService {
            numbering: InvoiceNumbering::new(
                db.clone(),
                clock.clone(),
                config.store.utc_offset_minutes,
            ),
            ledger: StockLedger::new(db.clone(), cache.clone(), clock.clone(), retry.clone()),
            writer: InvoiceWriter::new(
                db.clone(),
                cache.clone(),
                clock.clone(),
                retry,
                delivery.clone(),
            ),
            distributor: PushDistributor::new(db.clone(), cache.clone(), config.coalesce_window()),
            delivery,
            config,
            db,
            cache,
            clock,
            outbox_handle: None,
        }
    }

    /// Spawns the ledger outbox worker. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.outbox_handle.is_some() {
            return;
        }

        let (processor, handle) =
            LedgerOutboxProcessor::new(self.delivery.clone(), self.config.outbox.clone());
        tokio::spawn(processor.run());
        self.outbox_handle = Some(handle);

        info!(store_id = %self.config.store_id(), "Data service started");
    }

    /// Stops the outbox worker. Pending ledger tasks stay queued.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.outbox_handle.take() {
            if let Err(e) = handle.shutdown().await {
                warn!(error = %e, "Outbox worker already gone");
            }
        }
        info!("Data service stopped");
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn numbering(&self) -> &InvoiceNumbering {
        &self.numbering
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    pub fn distributor(&self) -> &PushDistributor {
        &self.distributor
    }

    // =========================================================================
    // Cached Reads
    // =========================================================================

    async fn read_through<T, F, Fut>(
        &self,
        store_id: &str,
        collection: Collection,
        load: F,
    ) -> DataResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<Vec<T>>>,
    {
        if let Some(items) = self.cache.get::<T>(store_id, collection).await {
            debug!(store_id = %store_id, collection = %collection, "Cache hit");
            return Ok(items);
        }

        let items = load().await?;
        self.cache.put(store_id, collection, &items).await;
        Ok(items)
    }

    pub async fn get_products(&self, store_id: &str) -> DataResult<Vec<Product>> {
        self.read_through(store_id, Collection::Products, || async move {
            self.db.products().list(store_id).await
        })
        .await
    }

    pub async fn get_customers(&self, store_id: &str) -> DataResult<Vec<Customer>> {
        self.read_through(store_id, Collection::Customers, || async move {
            self.db.customers().list(store_id).await
        })
        .await
    }

    /// Invoices, newest business date first.
    pub async fn get_invoices(&self, store_id: &str) -> DataResult<Vec<Invoice>> {
        let mut invoices = self
            .read_through(store_id, Collection::Invoices, || async move {
                self.db.invoices().list(store_id).await
            })
            .await?;
        invoices.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
        Ok(invoices)
    }

    pub async fn get_employees(&self, store_id: &str) -> DataResult<Vec<Employee>> {
        self.read_through(store_id, Collection::Employees, || async move {
            self.db.staff().list_employees(store_id).await
        })
        .await
    }

    pub async fn get_attendance(&self, store_id: &str) -> DataResult<Vec<AttendanceRecord>> {
        self.read_through(store_id, Collection::Attendance, || async move {
            self.db.staff().list_attendance(store_id).await
        })
        .await
    }

    pub async fn get_salaries(&self, store_id: &str) -> DataResult<Vec<SalaryRecord>> {
        self.read_through(store_id, Collection::Salaries, || async move {
            self.db.staff().list_salaries(store_id).await
        })
        .await
    }

    pub async fn get_categories(&self, store_id: &str) -> DataResult<Vec<Category>> {
        self.read_through(store_id, Collection::Categories, || async move {
            self.db.categories().list(store_id).await
        })
        .await
    }

    /// Direct lookup, bypassing the cache.
    pub async fn get_invoice(&self, store_id: &str, id: &str) -> DataResult<Option<Invoice>> {
        Ok(self.db.invoices().get(store_id, id).await?)
    }

    /// Direct lookup, bypassing the cache.
    pub async fn get_product(&self, store_id: &str, id: &str) -> DataResult<Option<Product>> {
        Ok(self.db.products().get(store_id, id).await?)
    }

    // =========================================================================
    // Saves
    // =========================================================================

    /// Saves a product through the ledger so stock changes are recorded.
    pub async fn save_product(
        &self,
        store_id: &str,
        product: &Product,
        actor: &Actor,
    ) -> DataResult<Product> {
        self.ledger
            .save_product_with_barcode(store_id, product, actor)
            .await
    }

    pub async fn save_customer(
        &self,
        store_id: &str,
        customer: &Customer,
        role: UserRole,
    ) -> DataResult<Customer> {
        permissions::require(role, Capability::ManageCustomers)?;

        let mut customer = customer.clone();
        assign_id(&mut customer.id);
        self.db.customers().upsert(store_id, &customer).await?;

        self.cache
            .upsert_item(store_id, Collection::Customers, &customer)
            .await;
        Ok(customer)
    }

    /// Metadata-only invoice save (status, delivery, payment updates).
    /// Stock is never touched here. An existing invoice keeps its stored
    /// lines and totals, and the cache receives the stored copy.
    pub async fn save_invoice(&self, store_id: &str, invoice: &Invoice) -> DataResult<()> {
        permissions::require(invoice.performer_role(), Capability::CreateInvoice)?;
        validate_invoice(invoice)?;

        self.db
            .invoices()
            .upsert(store_id, invoice, self.clock.now())
            .await?;
        self.writer.sync_invoice_cache(store_id, invoice).await;
        Ok(())
    }

    pub async fn save_employee(
        &self,
        store_id: &str,
        employee: &Employee,
        role: UserRole,
    ) -> DataResult<Employee> {
        permissions::require(role, Capability::ManageStaff)?;

        let mut employee = employee.clone();
        assign_id(&mut employee.id);
        self.db.staff().upsert_employee(store_id, &employee).await?;

        self.cache
            .upsert_item(store_id, Collection::Employees, &employee)
            .await;
        Ok(employee)
    }

    pub async fn save_attendance(
        &self,
        store_id: &str,
        record: &AttendanceRecord,
        role: UserRole,
    ) -> DataResult<AttendanceRecord> {
        permissions::require(role, Capability::ManageStaff)?;

        let mut record = record.clone();
        assign_id(&mut record.id);
        self.db.staff().upsert_attendance(store_id, &record).await?;

        self.cache
            .upsert_item(store_id, Collection::Attendance, &record)
            .await;
        Ok(record)
    }

    pub async fn save_salary(
        &self,
        store_id: &str,
        record: &SalaryRecord,
        role: UserRole,
    ) -> DataResult<SalaryRecord> {
        permissions::require(role, Capability::ManageStaff)?;

        let mut record = record.clone();
        assign_id(&mut record.id);
        self.db.staff().upsert_salary(store_id, &record).await?;

        self.cache
            .upsert_item(store_id, Collection::Salaries, &record)
            .await;
        Ok(record)
    }

    pub async fn save_category(
        &self,
        store_id: &str,
        category: &Category,
        role: UserRole,
    ) -> DataResult<Category> {
        permissions::require(role, Capability::ManageCategories)?;

        let mut category = category.clone();
        assign_id(&mut category.id);
        self.db.categories().upsert(store_id, &category).await?;

        self.cache
            .upsert_item(store_id, Collection::Categories, &category)
            .await;
        Ok(category)
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    /// Removes a product. Its ledger entries stay.
    pub async fn delete_product(&self, store_id: &str, id: &str, role: UserRole) -> DataResult<bool> {
        permissions::require(role, Capability::ManageProducts)?;
        let removed = self.db.products().delete(store_id, id).await?;
        self.forget::<Product>(store_id, Collection::Products, id).await;
        Ok(removed)
    }

    pub async fn delete_category(&self, store_id: &str, id: &str, role: UserRole) -> DataResult<bool> {
        permissions::require(role, Capability::ManageCategories)?;
        let removed = self.db.categories().delete(store_id, id).await?;
        self.forget::<Category>(store_id, Collection::Categories, id).await;
        Ok(removed)
    }

    pub async fn delete_customer(&self, store_id: &str, id: &str, role: UserRole) -> DataResult<bool> {
        permissions::require(role, Capability::ManageCustomers)?;
        let removed = self.db.customers().delete(store_id, id).await?;
        self.forget::<Customer>(store_id, Collection::Customers, id).await;
        Ok(removed)
    }

    /// Removes the invoice record. Sold stock is not returned to the shelf.
    pub async fn delete_invoice(&self, store_id: &str, id: &str, role: UserRole) -> DataResult<bool> {
        permissions::require(role, Capability::DeleteInvoice)?;
        let removed = self.db.invoices().delete(store_id, id).await?;
        self.cache.invalidate(store_id, Collection::Invoices).await;

        info!(store_id = %store_id, invoice_id = %id, removed, "Invoice deleted");
        Ok(removed)
    }

    async fn forget<T: CacheItem>(&self, store_id: &str, collection: Collection, id: &str) {
        self.cache.remove_item::<T>(store_id, collection, id).await;
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub async fn get_settings(&self, store_id: &str) -> DataResult<BusinessSettings> {
        Ok(self.db.settings().get(store_id).await?)
    }

    /// Fields set in `update` overwrite; everything else is kept.
    pub async fn save_settings(
        &self,
        store_id: &str,
        update: &BusinessSettings,
        role: UserRole,
    ) -> DataResult<BusinessSettings> {
        permissions::require(role, Capability::ManageSettings)?;
        Ok(self
            .db
            .settings()
            .merge(store_id, update, self.clock.now())
            .await?)
    }

    // =========================================================================
    // Cache Control
    // =========================================================================

    /// Drops every cached collection of one store.
    pub async fn clear_cache(&self, store_id: &str) {
        self.cache.invalidate_all(store_id).await;
    }

    /// Drops every cached collection of every store.
    pub async fn clear_all_cache(&self) {
        self.cache.invalidate_everything().await;
    }

    // =========================================================================
    // Sales and Numbering
    // =========================================================================

    pub async fn save_invoice_with_stock_update(
        &self,
        store_id: &str,
        invoice: &Invoice,
    ) -> DataResult<SaleReceipt> {
        self.writer
            .save_invoice_with_stock_update(store_id, invoice)
            .await
    }

    pub async fn next_invoice_number(&self, store_id: &str) -> String {
        self.numbering.next_invoice_number(store_id).await
    }

    pub async fn today_counter(&self, store_id: &str) -> i64 {
        self.numbering.today_counter(store_id).await
    }

    pub async fn date_counter(&self, store_id: &str, date: NaiveDate) -> i64 {
        self.numbering.date_counter(store_id, date).await
    }

    pub async fn fix_today_counter(&self, store_id: &str, role: UserRole) -> DataResult<i64> {
        self.numbering.fix_today_counter(store_id, role).await
    }

    pub async fn all_counters(&self, store_id: &str) -> Vec<DailyCounter> {
        self.numbering.all_counters(store_id).await
    }

    pub async fn reset_date_counter(
        &self,
        store_id: &str,
        date: NaiveDate,
        start: i64,
        reset_by: &str,
        role: UserRole,
    ) -> DataResult<DailyCounter> {
        self.numbering
            .reset_date_counter(store_id, date, start, reset_by, role)
            .await
    }

    pub async fn current_invoice_number(&self, store_id: &str) -> i64 {
        self.numbering.current_invoice_number(store_id).await
    }

    // =========================================================================
    // Stock Ledger
    // =========================================================================

    pub async fn create_stock_history(
        &self,
        store_id: &str,
        entry: &NewStockEntry,
    ) -> DataResult<StockHistory> {
        self.ledger.create_stock_history(store_id, entry).await
    }

    pub async fn get_stock_history(
        &self,
        store_id: &str,
        filter: &StockHistoryFilter,
    ) -> Vec<StockHistory> {
        self.ledger.get_stock_history(store_id, filter).await
    }

    pub async fn update_product_stock(
        &self,
        store_id: &str,
        adjustment: &StockAdjustment,
    ) -> DataResult<(Product, StockHistory)> {
        self.ledger.update_product_stock(store_id, adjustment).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe_products<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Product>) + Send + 'static,
    {
        self.distributor.subscribe_products(store_id, on_change)
    }

    pub fn subscribe_customers<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Customer>) + Send + 'static,
    {
        self.distributor.subscribe_customers(store_id, on_change)
    }

    pub fn subscribe_invoices<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Invoice>) + Send + 'static,
    {
        self.distributor.subscribe_invoices(store_id, on_change)
    }

    pub fn subscribe_categories<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Category>) + Send + 'static,
    {
        self.distributor.subscribe_categories(store_id, on_change)
    }

    pub fn subscribe_employees<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Employee>) + Send + 'static,
    {
        self.distributor.subscribe_employees(store_id, on_change)
    }

    pub fn subscribe_stock_history<F>(
        &self,
        store_id: &str,
        product_id: Option<&str>,
        on_change: F,
    ) -> Subscription
    where
        F: FnMut(Vec<StockHistory>) + Send + 'static,
    {
        self.distributor
            .subscribe_stock_history(store_id, product_id, on_change)
    }
}

fn assign_id(id: &mut String) {
    if id.trim().is_empty() {
        *id = Uuid::new_v4().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Fixture};
    use chrono::TimeDelta;
    use tally_core::{CoreError, InvoiceStatus, Quantity, StockChangeType};

    fn service(fx: &Fixture) -> DataService {
        DataService::new(
            DataConfig::default(),
            fx.db.clone(),
            fx.cache.clone(),
            fx.shared_clock(),
        )
    }

    fn customer(id: &str, name: &str) -> Customer {
        Customer {
            id: id.to_string(),
            name: name.to_string(),
            phone: "01700000000".to_string(),
            address: "Road 4".to_string(),
            email: None,
            nid_card: None,
            card_number: None,
            total_due_cents: 0,
        }
    }

    #[tokio::test]
    async fn test_reads_are_served_from_cache_until_stale() {
        let fx = Fixture::new().await;
        let svc = service(&fx);
        fx.stock("s1", &testing::product("p1", "Hanger", 4)).await;

        assert_eq!(svc.get_products("s1").await.unwrap().len(), 1);

        // Written behind the cache's back.
        fx.stock("s1", &testing::product("p2", "Garment Bag", 2)).await;
        assert_eq!(svc.get_products("s1").await.unwrap().len(), 1);

        fx.clock.advance(TimeDelta::seconds(301));
        assert_eq!(svc.get_products("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resaved_invoice_caches_stored_copy() {
        let fx = Fixture::new().await;
        let svc = service(&fx);
        let p = testing::product("p1", "Hanger", 10);
        let invoice = testing::invoice("INV-01012025-001", &[(&p, 2)]);
        svc.save_invoice("s1", &invoice).await.unwrap();
        svc.get_invoices("s1").await.unwrap();

        let mut edited = invoice.clone();
        edited.items[0].quantity = Quantity::units(9);
        edited.grand_total_cents = 1;
        edited.status = InvoiceStatus::Delivered;
        svc.save_invoice("s1", &edited).await.unwrap();

        let stored = svc.get_invoice("s1", &invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.items[0].quantity, Quantity::units(2));
        assert_eq!(stored.grand_total_cents, 1000);
        assert_eq!(stored.status, InvoiceStatus::Delivered);

        let cached = fx.cache.get::<Invoice>("s1", Collection::Invoices).await.unwrap();
        assert_eq!(cached, vec![stored]);
    }

    #[tokio::test]
    async fn test_save_customer_upserts_cache() {
        let fx = Fixture::new().await;
        let svc = service(&fx);
        svc.get_customers("s1").await.unwrap();

        let saved = svc
            .save_customer("s1", &customer("", "Nadia"), UserRole::Cashier)
            .await
            .unwrap();
        assert!(!saved.id.is_empty());

        let cached = fx
            .cache
            .get::<Customer>("s1", Collection::Customers)
            .await
            .unwrap();
        assert_eq!(cached, vec![saved.clone()]);

        assert!(svc.delete_customer("s1", &saved.id, UserRole::Manager).await.unwrap());
        assert!(svc.get_customers("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_check_role() {
        let fx = Fixture::new().await;
        let svc = service(&fx);

        let err = svc
            .save_category(
                "s1",
                &Category {
                    id: "wash".to_string(),
                    name: "Wash & Fold".to_string(),
                    description: None,
                    color: None,
                },
                UserRole::Cashier,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Core(CoreError::PermissionDenied { .. })));

        let err = svc.delete_invoice("s1", "INV-01012025-001", UserRole::Salesman).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_delete_invoice_keeps_stock() {
        let fx = Fixture::new().await;
        let svc = service(&fx);
        let p = fx.stock("s1", &testing::product("p1", "Hanger", 5)).await;
        let inv = testing::invoice("INV-01012025-001", &[(&p, 2)]);
        svc.save_invoice_with_stock_update("s1", &inv).await.unwrap();
        assert_eq!(svc.get_invoices("s1").await.unwrap().len(), 1);

        assert!(svc.delete_invoice("s1", &inv.id, UserRole::Manager).await.unwrap());

        assert!(svc.get_invoices("s1").await.unwrap().is_empty());
        assert!(svc.get_invoice("s1", &inv.id).await.unwrap().is_none());
        assert_eq!(svc.get_product("s1", "p1").await.unwrap().unwrap().stock, Quantity::units(3));
    }

    #[tokio::test]
    async fn test_settings_merge_keeps_absent_fields() {
        let fx = Fixture::new().await;
        let svc = service(&fx);

        svc.save_settings(
            "s1",
            &BusinessSettings {
                name: Some("Sparkle Laundry".to_string()),
                phone: Some("01711111111".to_string()),
                ..BusinessSettings::default()
            },
            UserRole::Admin,
        )
        .await
        .unwrap();

        let merged = svc
            .save_settings(
                "s1",
                &BusinessSettings {
                    phone: Some("01722222222".to_string()),
                    ..BusinessSettings::default()
                },
                UserRole::Admin,
            )
            .await
            .unwrap();

        assert_eq!(merged.name.as_deref(), Some("Sparkle Laundry"));
        assert_eq!(merged.phone.as_deref(), Some("01722222222"));
        assert_eq!(svc.get_settings("s1").await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_reload() {
        let fx = Fixture::new().await;
        let svc = service(&fx);
        svc.get_products("s1").await.unwrap();
        svc.get_products("s2").await.unwrap();

        fx.stock("s1", &testing::product("p1", "Hanger", 1)).await;
        fx.stock("s2", &testing::product("p1", "Hanger", 1)).await;

        svc.clear_cache("s1").await;
        assert_eq!(svc.get_products("s1").await.unwrap().len(), 1);
        assert!(svc.get_products("s2").await.unwrap().is_empty());

        svc.clear_all_cache().await;
        assert_eq!(svc.get_products("s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sale_flow_through_service() {
        let fx = Fixture::new().await;
        let mut svc = service(&fx);
        svc.start();

        let manager = Actor::new("Rahim", UserRole::Manager);
        let saved = svc
            .save_product("s1", &testing::product("", "Starch Spray", 10), &manager)
            .await
            .unwrap();
        assert_eq!(saved.barcode.as_deref(), Some("001"));

        fx.clock.advance(TimeDelta::minutes(5));
        let number = svc.next_invoice_number("s1").await;
        assert_eq!(number, "INV-01012025-001");
        assert_eq!(svc.today_counter("s1").await, 1);

        let inv = testing::invoice(&number, &[(&saved, 4)]);
        let receipt = svc.save_invoice_with_stock_update("s1", &inv).await.unwrap();
        assert!(receipt.stock_deducted);

        let history = svc
            .get_stock_history("s1", &StockHistoryFilter::for_product(&saved.id))
            .await;
        let kinds: Vec<StockChangeType> = history.iter().map(|e| e.change_type).collect();
        assert_eq!(kinds, vec![StockChangeType::Sale, StockChangeType::Initial]);

        let (product, entry) = svc
            .update_product_stock(
                "s1",
                &StockAdjustment {
                    product_id: saved.id.clone(),
                    new_stock: Quantity::units(20),
                    change_type: StockChangeType::Add,
                    reason: "Delivery".to_string(),
                    performed_by: "Rahim".to_string(),
                    performed_by_role: UserRole::Manager,
                    reference_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(product.stock, Quantity::units(20));
        assert_eq!(entry.quantity, Quantity::units(14));

        svc.shutdown().await;
    }
}
