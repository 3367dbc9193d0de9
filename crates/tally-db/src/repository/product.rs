//! # Product Repository
//!
//! Database operations for the product catalog.
//!
//! ## Optimistic Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Version-Guarded Stock Writes                           │
//! │                                                                         │
//! │  Till A reads  p1 { stock: 10, version: 4 }                            │
//! │  Till B reads  p1 { stock: 10, version: 4 }                            │
//! │                                                                         │
//! │  Till A: UPDATE ... SET stock = 8, version = 5                         │
//! │          WHERE id = 'p1' AND version = 4      → 1 row  ✅              │
//! │                                                                         │
//! │  Till B: UPDATE ... SET stock = 9, version = 5                         │
//! │          WHERE id = 'p1' AND version = 4      → 0 rows ❌              │
//! │          → DbError::StockConflict, re-read, try again                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stock-changing write also writes its ledger entry in the same
//! transaction, so the product and its history never disagree.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::repository::stock_history::insert_entry;
use tally_core::{Collection, Product, Quantity, StockHistory};

/// Conditionally sets a product's stock. `None` means the version moved on.
pub(crate) async fn update_stock_in(
    conn: &mut SqliteConnection,
    store_id: &str,
    product_id: &str,
    expected_version: i64,
    new_stock: Quantity,
    now: DateTime<Utc>,
) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET stock = ?, version = version + 1, updated_at = ?
        WHERE store_id = ? AND id = ? AND version = ?
        RETURNING *
        "#,
    )
    .bind(new_stock)
    .bind(now)
    .bind(store_id)
    .bind(product_id)
    .bind(expected_version)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(product)
}

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// let all = repo.list("store-1").await?;
/// let shirt = repo.find_by_barcode("store-1", "001").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        ProductRepository { pool, feed }
    }

    /// All products of a store, sorted by name.
    pub async fn list(&self, store_id: &str) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE store_id = ? ORDER BY name COLLATE NOCASE, id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(store_id = %store_id, count = products.len(), "Listed products");
        Ok(products)
    }

    /// Gets a product by its id.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get(&self, store_id: &str, id: &str) -> DbResult<Option<Product>> {
        let product =
            sqlx::query_as::<_, Product>("SELECT * FROM products WHERE store_id = ? AND id = ?")
                .bind(store_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(product)
    }

    pub async fn find_by_barcode(&self, store_id: &str, barcode: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE store_id = ? AND barcode = ?",
        )
        .bind(store_id)
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Every non-null barcode in the store.
    pub async fn list_barcodes(&self, store_id: &str) -> DbResult<Vec<String>> {
        let barcodes: Vec<String> = sqlx::query_scalar(
            "SELECT barcode FROM products WHERE store_id = ? AND barcode IS NOT NULL",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(barcodes)
    }

    /// Unconditional insert-or-replace of a product's fields.
    ///
    /// Used for imports and seeding. Stock changes made this way leave no
    /// ledger entry; the service layer goes through [`Self::save`] instead.
    pub async fn upsert(&self, store_id: &str, product: &Product, now: DateTime<Utc>) -> DbResult<Product> {
        let saved = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (
                store_id, id, name, barcode, category, price_cents, purchase_price_cents,
                vat_bps, stock, unit, kind, image_url, version, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT (store_id, id) DO UPDATE SET
                name = excluded.name,
                barcode = excluded.barcode,
                category = excluded.category,
                price_cents = excluded.price_cents,
                purchase_price_cents = excluded.purchase_price_cents,
                vat_bps = excluded.vat_bps,
                stock = excluded.stock,
                unit = excluded.unit,
                kind = excluded.kind,
                image_url = excluded.image_url,
                version = products.version + 1,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.barcode)
        .bind(&product.category)
        .bind(product.price_cents)
        .bind(product.purchase_price_cents)
        .bind(product.vat_bps)
        .bind(product.stock)
        .bind(&product.unit)
        .bind(product.kind)
        .bind(&product.image_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.feed.publish(
            ChangeEvent::upserted(store_id, Collection::Products, &saved.id).for_product(&saved.id),
        );
        Ok(saved)
    }

    /// Saves a product and, when given, its ledger entry in one transaction.
    ///
    /// ## Arguments
    /// * `expected_version` - `None` inserts a new product; `Some(v)` updates
    ///   the existing row only if its version is still `v`
    /// * `entry` - Ledger entry describing the stock change, if any
    ///
    /// ## Errors
    /// * `StockConflict` - The product changed since it was read
    /// * `UniqueViolation` - Barcode or id already taken
    pub async fn save(
        &self,
        store_id: &str,
        product: &Product,
        expected_version: Option<i64>,
        entry: Option<&StockHistory>,
        now: DateTime<Utc>,
    ) -> DbResult<(Product, Option<StockHistory>)> {
        let mut tx = self.pool.begin().await?;

        let saved = match expected_version {
            None => {
                sqlx::query_as::<_, Product>(
                    r#"
                    INSERT INTO products (
                        store_id, id, name, barcode, category, price_cents, purchase_price_cents,
                        vat_bps, stock, unit, kind, image_url, version, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
                    RETURNING *
                    "#,
                )
                .bind(store_id)
                .bind(&product.id)
                .bind(&product.name)
                .bind(&product.barcode)
                .bind(&product.category)
                .bind(product.price_cents)
                .bind(product.purchase_price_cents)
                .bind(product.vat_bps)
                .bind(product.stock)
                .bind(&product.unit)
                .bind(product.kind)
                .bind(&product.image_url)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
            Some(version) => sqlx::query_as::<_, Product>(
                r#"
                UPDATE products SET
                    name = ?, barcode = ?, category = ?, price_cents = ?,
                    purchase_price_cents = ?, vat_bps = ?, stock = ?, unit = ?,
                    kind = ?, image_url = ?, version = version + 1, updated_at = ?
                WHERE store_id = ? AND id = ? AND version = ?
                RETURNING *
                "#,
            )
            .bind(&product.name)
            .bind(&product.barcode)
            .bind(&product.category)
            .bind(product.price_cents)
            .bind(product.purchase_price_cents)
            .bind(product.vat_bps)
            .bind(product.stock)
            .bind(&product.unit)
            .bind(product.kind)
            .bind(&product.image_url)
            .bind(now)
            .bind(store_id)
            .bind(&product.id)
            .bind(version)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::StockConflict {
                product_id: product.id.clone(),
                expected_version: version,
            })?,
        };

        let written = match entry {
            Some(entry) => {
                let mut entry = entry.clone();
                entry.id = insert_entry(&mut *tx, &entry).await?;
                Some(entry)
            }
            None => None,
        };

        tx.commit().await?;

        info!(
            store_id = %store_id,
            product_id = %saved.id,
            stock = %saved.stock,
            version = saved.version,
            "Product saved"
        );

        self.feed.publish(
            ChangeEvent::upserted(store_id, Collection::Products, &saved.id).for_product(&saved.id),
        );
        if let Some(entry) = &written {
            self.feed.publish(
                ChangeEvent::upserted(store_id, Collection::StockHistory, &entry.id)
                    .for_product(&entry.product_id),
            );
        }
        Ok((saved, written))
    }

    /// Sets a product's stock if its version is unchanged, writing the
    /// ledger entry in the same transaction.
    pub async fn adjust_stock(
        &self,
        store_id: &str,
        product_id: &str,
        expected_version: i64,
        new_stock: Quantity,
        entry: &StockHistory,
        now: DateTime<Utc>,
    ) -> DbResult<(Product, StockHistory)> {
        let mut tx = self.pool.begin().await?;

        let product = update_stock_in(&mut *tx, store_id, product_id, expected_version, new_stock, now)
            .await?
            .ok_or_else(|| DbError::StockConflict {
                product_id: product_id.to_string(),
                expected_version,
            })?;

        let mut written = entry.clone();
        written.id = insert_entry(&mut *tx, &written).await?;

        tx.commit().await?;

        debug!(
            store_id = %store_id,
            product_id = %product_id,
            new_stock = %new_stock,
            "Stock adjusted"
        );

        self.feed.publish(
            ChangeEvent::upserted(store_id, Collection::Products, product_id).for_product(product_id),
        );
        self.feed.publish(
            ChangeEvent::upserted(store_id, Collection::StockHistory, &written.id)
                .for_product(product_id),
        );
        Ok((product, written))
    }

    /// Deletes a product. Its ledger history is kept.
    pub async fn delete(&self, store_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE store_id = ? AND id = ?")
            .bind(store_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.feed
                .publish(ChangeEvent::deleted(store_id, Collection::Products, id).for_product(id));
        }
        Ok(deleted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
