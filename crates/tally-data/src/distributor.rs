//! # Push-Update Distributor
//!
//! Live collection snapshots for every connected screen.
//!
//! ## Subscription Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Push Subscription Flow                             │
//! │                                                                         │
//! │  subscribe_products(store, on_change)                                  │
//! │       │                                                                 │
//! │       ├── feed.subscribe()          (before the first read, so no      │
//! │       │                              change slips between the two)     │
//! │       ├── snapshot → cache.put → on_change(all products)               │
//! │       ▼                                                                 │
//! │  ┌───────────────────────────────────────────────────────────────┐     │
//! │  │ loop                                                          │     │
//! │  │   ChangeEvent for (store, products)                           │     │
//! │  │     └── wait coalesce window, drop queued events              │     │
//! │  │         snapshot → cache.put → on_change                      │     │
//! │  │   Lagged(n)  → resync snapshot                                │     │
//! │  │   cancelled  → stop                                           │     │
//! │  └───────────────────────────────────────────────────────────────┘     │
//! │                                                                         │
//! │  Subscription::unsubscribe() / drop  → token cancelled, task exits     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Snapshots overwrite the cache unconditionally: whatever the store says
//! replaces any local optimistic state. Stock history is not cached.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tally_core::{
    Category, Collection, Customer, Employee, Invoice, Product, StockHistory, StockHistoryFilter,
};
use tally_db::{ChangeEvent, Database, DbResult};

use crate::cache::Cache;

// =============================================================================
// Subscription
// =============================================================================

/// A live feed. Dropping it detaches the feed.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    /// Detaches the feed. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            debug!("Subscription cancelled");
        }
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// =============================================================================
// Distributor
// =============================================================================

/// Which events a feed reacts to.
#[derive(Debug, Clone)]
struct Topic {
    store_id: String,
    collection: Collection,
    product_id: Option<String>,
}

impl Topic {
    fn matches(&self, event: &ChangeEvent) -> bool {
        event.store_id == self.store_id
            && event.collection == self.collection
            && match &self.product_id {
                Some(pid) => event.product_id.as_deref() == Some(pid.as_str()),
                None => true,
            }
    }
}

#[derive(Debug, Clone)]
pub struct PushDistributor {
    db: Database,
    cache: Cache,
    coalesce_window: Duration,
}

impl PushDistributor {
    pub fn new(db: Database, cache: Cache, coalesce_window: Duration) -> Self {
        PushDistributor {
            db,
            cache,
            coalesce_window,
        }
    }

    pub fn subscribe_products<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Product>) + Send + 'static,
    {
        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::Products,
                product_id: None,
            },
            true,
            |db: Database, store: String| async move { db.products().list(&store).await },
            on_change,
        )
    }

    pub fn subscribe_customers<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Customer>) + Send + 'static,
    {
        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::Customers,
                product_id: None,
            },
            true,
            |db: Database, store: String| async move { db.customers().list(&store).await },
            on_change,
        )
    }

    /// Invoices arrive newest first by business date.
    pub fn subscribe_invoices<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Invoice>) + Send + 'static,
    {
        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::Invoices,
                product_id: None,
            },
            true,
            |db: Database, store: String| async move {
                let mut invoices = db.invoices().list(&store).await?;
                invoices.sort_by(|a, b| b.date.cmp(&a.date));
                Ok(invoices)
            },
            on_change,
        )
    }

    pub fn subscribe_categories<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Category>) + Send + 'static,
    {
        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::Categories,
                product_id: None,
            },
            true,
            |db: Database, store: String| async move { db.categories().list(&store).await },
            on_change,
        )
    }

    pub fn subscribe_employees<F>(&self, store_id: &str, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Employee>) + Send + 'static,
    {
        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::Employees,
                product_id: None,
            },
            true,
            |db: Database, store: String| async move { db.staff().list_employees(&store).await },
            on_change,
        )
    }

    /// Ledger entries, newest first, optionally for one product only.
    pub fn subscribe_stock_history<F>(
        &self,
        store_id: &str,
        product_id: Option<&str>,
        on_change: F,
    ) -> Subscription
    where
        F: FnMut(Vec<StockHistory>) + Send + 'static,
    {
        let filter = StockHistoryFilter {
            product_id: product_id.map(str::to_string),
            ..StockHistoryFilter::all()
        };

        self.spawn(
            Topic {
                store_id: store_id.to_string(),
                collection: Collection::StockHistory,
                product_id: filter.product_id.clone(),
            },
            false,
            move |db: Database, store: String| {
                let filter = filter.clone();
                async move { db.stock_history().query(&store, &filter).await }
            },
            on_change,
        )
    }

    fn spawn<T, L, Fut, F>(&self, topic: Topic, cached: bool, load: L, on_change: F) -> Subscription
    where
        T: Serialize + Send + Sync + 'static,
        L: Fn(Database, String) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<Vec<T>>> + Send + 'static,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let feed = Feed {
            topic,
            cached,
            db: self.db.clone(),
            cache: self.cache.clone(),
            coalesce_window: self.coalesce_window,
            token: token.clone(),
            load,
            on_change,
        };

        tokio::spawn(feed.run());
        Subscription { token }
    }
}

// =============================================================================
// Feed Task
// =============================================================================

struct Feed<L, F> {
    topic: Topic,
    cached: bool,
    db: Database,
    cache: Cache,
    coalesce_window: Duration,
    token: CancellationToken,
    load: L,
    on_change: F,
}

impl<T, L, Fut, F> Feed<L, F>
where
    T: Serialize + Send + Sync + 'static,
    L: Fn(Database, String) -> Fut + Send + 'static,
    Fut: Future<Output = DbResult<Vec<T>>> + Send + 'static,
    F: FnMut(Vec<T>) + Send + 'static,
{
    async fn run(mut self) {
        let mut rx = self.db.feed().subscribe();
        debug!(
            store_id = %self.topic.store_id,
            collection = %self.topic.collection,
            "Push feed attached"
        );

        self.deliver().await;

        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Ok(event) if self.topic.matches(&event) => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped,
                        collection = %self.topic.collection,
                        "Push feed lagged, resyncing"
                    );
                }
                Err(RecvError::Closed) => break,
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.coalesce_window) => {}
            }

            let mut closed = false;
            loop {
                match rx.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        closed = true;
                        break;
                    }
                }
            }

            self.deliver().await;
            if closed {
                break;
            }
        }

        info!(
            store_id = %self.topic.store_id,
            collection = %self.topic.collection,
            "Push feed detached"
        );
    }

    /// Reads the collection, refreshes the cache and hands the snapshot over.
    async fn deliver(&mut self) {
        let snapshot = match (self.load)(self.db.clone(), self.topic.store_id.clone()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    store_id = %self.topic.store_id,
                    collection = %self.topic.collection,
                    error = %e,
                    "Snapshot read failed"
                );
                return;
            }
        };

        if self.token.is_cancelled() {
            return;
        }

        if self.cached && self.topic.collection.is_cached() {
            self.cache
                .put(&self.topic.store_id, self.topic.collection, &snapshot)
                .await;
        }
        (self.on_change)(snapshot);
    }
}
