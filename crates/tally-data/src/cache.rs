//! # Cache Layer
//!
//! Per-store, per-collection local mirror of the system of record.
//!
//! ## Freshness
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Cache Entry Lifecycle                           │
//! │                                                                         │
//! │  put(store, products, [...])                                           │
//! │       │   payload + written_at stored in ONE record                    │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────┐   now - written_at < ttl   ┌──────────┐ │
//! │  │ CacheKey(store, products)│ ─────────────────────────► │ served   │ │
//! │  └──────────────────────────┘                            └──────────┘ │
//! │       │                                                                 │
//! │       │   now - written_at >= ttl                                      │
//! │       ▼                                                                 │
//! │  get() returns None, caller reads the database and put()s again        │
//! │                                                                         │
//! │  Writes and push snapshots overwrite the record unconditionally.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache is a disposable view. Storage failures are logged and treated
//! as a miss; they never fail the operation that touched the cache.
//!
//! Every operation on a key holds that key's lock, so a patch's read and
//! write-back never interleave with another patch, a snapshot `put` or an
//! invalidation of the same collection.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use tally_core::{
    AttendanceRecord, Category, Collection, Customer, Employee, Invoice, Product, SalaryRecord,
};

use crate::clock::SharedClock;
use crate::error::{DataError, DataResult};

// =============================================================================
// Keys and Records
// =============================================================================

/// Typed cache key: which store, which collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub store_id: String,
    pub collection: Collection,
}

impl CacheKey {
    pub fn new(store_id: impl Into<String>, collection: Collection) -> Self {
        CacheKey {
            store_id: store_id.into(),
            collection,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store_id, self.collection)
    }
}

/// A cached collection and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub payload: Value,
    pub written_at: DateTime<Utc>,
}

/// Documents that can be patched inside a cached list.
pub trait CacheItem: Serialize + DeserializeOwned + Send + Sync {
    fn cache_id(&self) -> &str;
}

macro_rules! cache_item {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheItem for $ty {
            fn cache_id(&self) -> &str {
                &self.id
            }
        })*
    };
}

cache_item!(Product, Customer, Invoice, Category, Employee, AttendanceRecord, SalaryRecord);

// =============================================================================
// Storage Seam
// =============================================================================

/// Where cache records live.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn read(&self, key: &CacheKey) -> DataResult<Option<CacheRecord>>;
    async fn write(&self, key: &CacheKey, record: CacheRecord) -> DataResult<()>;
    async fn remove(&self, key: &CacheKey) -> DataResult<()>;
    /// Every key currently stored.
    async fn keys(&self) -> DataResult<Vec<CacheKey>>;
}

/// Cache records in process memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    entries: RwLock<HashMap<CacheKey, CacheRecord>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn read(&self, key: &CacheKey) -> DataResult<Option<CacheRecord>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &CacheKey, record: CacheRecord) -> DataResult<()> {
        self.entries.write().await.insert(key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> DataResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> DataResult<Vec<CacheKey>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Cache records in a local SQLite file.
///
/// One row per key; payload and timestamp are written by the same
/// statement so they always change together.
#[derive(Debug, Clone)]
pub struct SqliteCacheStorage {
    pool: SqlitePool,
}

impl SqliteCacheStorage {
    /// Opens (or creates) the cache file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DataError::CacheFailed(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Throwaway cache database for tests.
    pub async fn in_memory() -> DataResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> DataResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                store_id    TEXT NOT NULL,
                collection  TEXT NOT NULL,
                payload     TEXT NOT NULL,
                written_at  TEXT NOT NULL,
                PRIMARY KEY (store_id, collection)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(SqliteCacheStorage { pool })
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn read(&self, key: &CacheKey) -> DataResult<Option<CacheRecord>> {
        let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT payload, written_at FROM cache_entries WHERE store_id = ? AND collection = ?",
        )
        .bind(&key.store_id)
        .bind(key.collection.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(payload, written_at)| {
            Ok(CacheRecord {
                payload: serde_json::from_str(&payload)?,
                written_at,
            })
        })
        .transpose()
    }

    async fn write(&self, key: &CacheKey, record: CacheRecord) -> DataResult<()> {
        let payload = serde_json::to_string(&record.payload)?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (store_id, collection, payload, written_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (store_id, collection) DO UPDATE SET
                payload = excluded.payload,
                written_at = excluded.written_at
            "#,
        )
        .bind(&key.store_id)
        .bind(key.collection.as_str())
        .bind(payload)
        .bind(record.written_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> DataResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE store_id = ? AND collection = ?")
            .bind(&key.store_id)
            .bind(key.collection.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> DataResult<Vec<CacheKey>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT store_id, collection FROM cache_entries")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(store_id, collection)| {
                collection
                    .parse::<Collection>()
                    .ok()
                    .map(|c| CacheKey::new(store_id, c))
            })
            .collect())
    }
}

// =============================================================================
// Cache
// =============================================================================

/// TTL-bounded cache over an injectable storage.
#[derive(Clone)]
pub struct Cache {
    storage: Arc<dyn CacheStorage>,
    ttl: TimeDelta,
    clock: SharedClock,
    locks: Arc<Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("ttl", &self.ttl).finish()
    }
}

impl Cache {
    pub fn new(storage: Arc<dyn CacheStorage>, ttl: Duration, clock: SharedClock) -> Self {
        Cache {
            storage,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_memory(ttl: Duration, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryCacheStorage::new()), ttl, clock)
    }

    /// Whether `record` may still be served.
    pub fn is_fresh(&self, record: &CacheRecord) -> bool {
        self.clock.now() - record.written_at < self.ttl
    }

    /// Cached list, or `None` when absent, stale or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, store_id: &str, collection: Collection) -> Option<Vec<T>> {
        let key = CacheKey::new(store_id, collection);
        let _guard = self.lock_key(&key).await;
        self.read_fresh(&key).await
    }

    /// Overwrites the cached list and its timestamp.
    pub async fn put<T: Serialize>(&self, store_id: &str, collection: Collection, items: &[T]) {
        let key = CacheKey::new(store_id, collection);
        let _guard = self.lock_key(&key).await;
        self.write_items(&key, items).await;
    }

    pub async fn invalidate(&self, store_id: &str, collection: Collection) {
        let key = CacheKey::new(store_id, collection);
        let _guard = self.lock_key(&key).await;
        self.remove_record(&key).await;
    }

    /// Drops every cached collection of a store.
    pub async fn invalidate_all(&self, store_id: &str) {
        for collection in Collection::CACHED {
            self.invalidate(store_id, collection).await;
        }
        debug!(store_id = %store_id, "Store cache cleared");
    }

    /// Drops every cached collection of every store.
    pub async fn invalidate_everything(&self) {
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list cache keys");
                return;
            }
        };

        for key in keys {
            let _guard = self.lock_key(&key).await;
            self.remove_record(&key).await;
        }
    }

    /// Replaces the item with the same id, or appends it.
    pub async fn upsert_item<T: CacheItem>(&self, store_id: &str, collection: Collection, item: &T) {
        self.patch::<T, _>(store_id, collection, |items| {
            let value = match serde_json::to_value(item).and_then(serde_json::from_value::<T>) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Could not copy item into cache");
                    return;
                }
            };
            match items.iter_mut().find(|i| i.cache_id() == item.cache_id()) {
                Some(existing) => *existing = value,
                None => items.push(value),
            }
        })
        .await;
    }

    /// Removes the item with `id`.
    pub async fn remove_item<T: CacheItem>(&self, store_id: &str, collection: Collection, id: &str) {
        self.patch::<T, _>(store_id, collection, |items| {
            items.retain(|i| i.cache_id() != id);
        })
        .await;
    }

    /// Applies `f` to every cached item.
    pub async fn map_items<T, F>(&self, store_id: &str, collection: Collection, mut f: F)
    where
        T: CacheItem,
        F: FnMut(&mut T),
    {
        self.patch::<T, _>(store_id, collection, |items| items.iter_mut().for_each(&mut f))
            .await;
    }

    /// Edits a fresh cached list in place. A missing or stale list is
    /// dropped; the next read refetches it whole.
    async fn patch<T, F>(&self, store_id: &str, collection: Collection, f: F)
    where
        T: CacheItem,
        F: FnOnce(&mut Vec<T>),
    {
        let key = CacheKey::new(store_id, collection);
        let _guard = self.lock_key(&key).await;

        let Some(mut items) = self.read_fresh::<T>(&key).await else {
            self.remove_record(&key).await;
            return;
        };
        f(&mut items);
        self.write_items(&key, &items).await;
    }

    // -------------------------------------------------------------------------
    // Unlocked primitives; callers hold the key's lock
    // -------------------------------------------------------------------------

    async fn lock_key(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    async fn read_fresh<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Vec<T>> {
        let record = match self.storage.read(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        if !self.is_fresh(&record) {
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        match serde_json::from_value(record.payload) {
            Ok(items) => Some(items),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached payload unreadable, dropping it");
                self.remove_record(key).await;
                None
            }
        }
    }

    async fn write_items<T: Serialize>(&self, key: &CacheKey, items: &[T]) {
        let payload = match serde_json::to_value(items) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not encode cache payload");
                return;
            }
        };

        let record = CacheRecord {
            payload,
            written_at: self.clock.now(),
        };
        if let Err(e) = self.storage.write(key, record).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    async fn remove_record(&self, key: &CacheKey) {
        if let Err(e) = self.storage.remove(key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }
}
