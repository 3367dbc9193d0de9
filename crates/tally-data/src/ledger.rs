//! # Stock Ledger Service
//!
//! Manual stock movements and product saves, each paired with its ledger
//! entry in one transaction.
//!
//! ## Stock Adjustment
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  update_product_stock(store, StockAdjustment { new_stock: 12, .. })     │
//! │                                                                         │
//! │  read product (stock 10, version 4)                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                 │
//! │    UPDATE products SET stock = 12 WHERE version = 4                    │
//! │    INSERT stock_history (+2, 10 → 12)                                  │
//! │  COMMIT ── version moved? re-read and try again                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  patch products cache                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The ledger itself is append-only: nothing here updates or deletes an
//! entry once written.

use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::barcode::{next_default_barcode, normalize_barcode, timestamp_barcode};
use tally_core::validation::{validate_product, validate_stock_entry, validate_stock_level};
use tally_core::{
    permissions, Capability, Collection, CoreError, NewStockEntry, Product, Quantity,
    StockChangeType, StockHistory, StockHistoryFilter, UserRole,
};
use tally_db::{materialize, Database, DbError};

use crate::cache::Cache;
use crate::clock::SharedClock;
use crate::error::{DataError, DataResult};
use crate::retry::RetryPolicy;

/// A manual stock movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: String,
    /// Stock level after the change.
    pub new_stock: Quantity,
    pub change_type: StockChangeType,
    pub reason: String,
    pub performed_by: String,
    pub performed_by_role: UserRole,
    pub reference_id: Option<String>,
}

/// Who is saving a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: UserRole,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: UserRole) -> Self {
        Actor {
            name: name.into(),
            role,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    db: Database,
    cache: Cache,
    clock: SharedClock,
    retry: RetryPolicy,
}

impl StockLedger {
    pub fn new(db: Database, cache: Cache, clock: SharedClock, retry: RetryPolicy) -> Self {
        StockLedger {
            db,
            cache,
            clock,
            retry,
        }
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Appends one entry. Unbalanced entries are rejected.
    pub async fn create_stock_history(
        &self,
        store_id: &str,
        entry: &NewStockEntry,
    ) -> DataResult<StockHistory> {
        validate_stock_entry(entry)?;
        let stored = self
            .db
            .stock_history()
            .append(store_id, entry, self.clock.now())
            .await?;
        Ok(stored)
    }

    /// Entries matching `filter`, newest first. Empty when the read fails.
    pub async fn get_stock_history(
        &self,
        store_id: &str,
        filter: &StockHistoryFilter,
    ) -> Vec<StockHistory> {
        match self.db.stock_history().query(store_id, filter).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Stock history read failed");
                Vec::new()
            }
        }
    }

    // =========================================================================
    // Stock Adjustment
    // =========================================================================

    /// Sets a product's stock and records the transition.
    ///
    /// ## Errors
    /// * `PermissionDenied` - Role may not adjust stock
    /// * `ProductNotFound` - No such product
    /// * `StockConflict` - Product kept changing through every retry
    pub async fn update_product_stock(
        &self,
        store_id: &str,
        adjustment: &StockAdjustment,
    ) -> DataResult<(Product, StockHistory)> {
        permissions::require(adjustment.performed_by_role, Capability::AdjustStock)?;
        validate_stock_level(adjustment.new_stock)?;

        let (product, entry) = self
            .retry
            .run("update_product_stock", |_| self.adjust_once(store_id, adjustment))
            .await?;

        info!(
            store_id = %store_id,
            product_id = %product.id,
            previous = %entry.previous_stock,
            new = %entry.new_stock,
            change_type = %entry.change_type,
            "Stock updated"
        );

        self.cache
            .upsert_item(store_id, Collection::Products, &product)
            .await;
        Ok((product, entry))
    }

    async fn adjust_once(
        &self,
        store_id: &str,
        adjustment: &StockAdjustment,
    ) -> DataResult<(Product, StockHistory)> {
        let now = self.clock.now();
        let product = self
            .db
            .products()
            .get(store_id, &adjustment.product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(adjustment.product_id.clone()))?;

        let entry = NewStockEntry::transition(
            &product,
            adjustment.change_type,
            product.stock,
            adjustment.new_stock,
            adjustment.reason.clone(),
            adjustment.performed_by.clone(),
            adjustment.performed_by_role,
            adjustment.reference_id.clone(),
        );

        let written = self
            .db
            .products()
            .adjust_stock(
                store_id,
                &product.id,
                product.version,
                adjustment.new_stock,
                &materialize(store_id, &entry, now),
                now,
            )
            .await?;
        Ok(written)
    }

    // =========================================================================
    // Product Save
    // =========================================================================

    /// Saves a product, assigning a barcode when it has none.
    ///
    /// A stock change against the stored product is recorded as `initial`
    /// for new products and `add`/`remove` for existing ones.
    ///
    /// ## Errors
    /// * `DuplicateBarcode` - Another product already uses the barcode
    pub async fn save_product_with_barcode(
        &self,
        store_id: &str,
        product: &Product,
        actor: &Actor,
    ) -> DataResult<Product> {
        permissions::require(actor.role, Capability::ManageProducts)?;

        let mut product = product.clone();
        if product.id.trim().is_empty() {
            product.id = Uuid::new_v4().to_string();
        }
        validate_product(&product)?;

        product.barcode = match normalize_barcode(product.barcode.as_deref()) {
            Some(code) => Some(code),
            None => Some(self.generate_barcode(store_id).await),
        };

        let product = &product;
        let saved = self
            .retry
            .run("save_product", |_| self.save_once(store_id, product, actor))
            .await?;

        self.cache
            .upsert_item(store_id, Collection::Products, &saved)
            .await;
        Ok(saved)
    }

    async fn save_once(&self, store_id: &str, product: &Product, actor: &Actor) -> DataResult<Product> {
        let now = self.clock.now();
        let products = self.db.products();

        if let Some(code) = product.barcode.as_deref() {
            if let Some(other) = products.find_by_barcode(store_id, code).await? {
                if other.id != product.id {
                    return Err(CoreError::DuplicateBarcode {
                        barcode: code.to_string(),
                        existing_product: other.name,
                    }
                    .into());
                }
            }
        }

        let existing = products.get(store_id, &product.id).await?;
        let previous = existing.as_ref().map(|p| p.stock).unwrap_or_default();

        let entry = match &existing {
            None if !product.stock.is_zero() => Some((StockChangeType::Initial, "Initial stock")),
            Some(_) if product.stock > previous => Some((StockChangeType::Add, "Stock added")),
            Some(_) if product.stock < previous => Some((StockChangeType::Remove, "Stock removed")),
            _ => None,
        }
        .map(|(change_type, reason)| {
            let entry = NewStockEntry::transition(
                product,
                change_type,
                previous,
                product.stock,
                reason,
                actor.name.clone(),
                actor.role,
                None,
            );
            materialize(store_id, &entry, now)
        });

        let result = products
            .save(
                store_id,
                product,
                existing.as_ref().map(|p| p.version),
                entry.as_ref(),
                now,
            )
            .await;
        let (saved, written) = match result {
            // another till took the barcode after the check above
            Err(err @ DbError::UniqueViolation { .. }) if is_barcode_violation(&err) => {
                return Err(self.barcode_taken(store_id, product, err).await);
            }
            other => other?,
        };

        if let Some(entry) = written {
            debug!(
                store_id = %store_id,
                product_id = %saved.id,
                change_type = %entry.change_type,
                quantity = %entry.quantity,
                "Product stock change recorded"
            );
        }
        Ok(saved)
    }

    /// Names the product now holding `product`'s barcode, falling back to
    /// the raw store error when the holder cannot be read.
    async fn barcode_taken(&self, store_id: &str, product: &Product, err: DbError) -> DataError {
        let Some(code) = product.barcode.as_deref() else {
            return err.into();
        };
        match self.db.products().find_by_barcode(store_id, code).await {
            Ok(Some(holder)) if holder.id != product.id => CoreError::DuplicateBarcode {
                barcode: code.to_string(),
                existing_product: holder.name,
            }
            .into(),
            _ => err.into(),
        }
    }

    /// Next free three-digit barcode, or a timestamp code if the scan fails.
    async fn generate_barcode(&self, store_id: &str) -> String {
        match self.db.products().list_barcodes(store_id).await {
            Ok(codes) => next_default_barcode(codes.iter().map(String::as_str)),
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "Barcode scan failed, using timestamp code");
                timestamp_barcode(self.clock.now().timestamp_millis())
            }
        }
    }
}

fn is_barcode_violation(err: &DbError) -> bool {
    matches!(err, DbError::UniqueViolation { field, .. } if field.ends_with("barcode"))
}
