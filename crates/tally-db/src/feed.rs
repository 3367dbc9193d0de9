//! # Change Feed
//!
//! Every repository publishes a [`ChangeEvent`] after its write commits.
//! Subscribers (the push distributor in tally-data) react by re-reading the
//! affected collection, so events carry identity only, never payloads.
//!
//! ```text
//! ┌────────────────┐  commit   ┌──────────────┐  broadcast  ┌──────────────┐
//! │ InvoiceRepo    │──────────►│  ChangeFeed  │────────────►│ subscriber 1 │
//! │ ProductRepo    │           │  (tokio      │────────────►│ subscriber 2 │
//! │ LedgerOutbox   │           │   broadcast) │────────────►│ ...          │
//! └────────────────┘           └──────────────┘             └──────────────┘
//! ```
//!
//! Events are only sent after commit. A rolled-back transaction publishes
//! nothing.

use tokio::sync::broadcast;
use tracing::trace;

use tally_core::Collection;

/// Default buffer per subscriber before it starts lagging.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// One committed change to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub store_id: String,
    pub collection: Collection,
    pub document_id: String,
    /// Product touched by the change, for product and ledger events.
    pub product_id: Option<String>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn upserted(store_id: &str, collection: Collection, document_id: &str) -> Self {
        ChangeEvent {
            store_id: store_id.to_string(),
            collection,
            document_id: document_id.to_string(),
            product_id: None,
            kind: ChangeKind::Upserted,
        }
    }

    pub fn deleted(store_id: &str, collection: Collection, document_id: &str) -> Self {
        ChangeEvent {
            kind: ChangeKind::Deleted,
            ..Self::upserted(store_id, collection, document_id)
        }
    }

    /// Tags the event with the product it concerns.
    pub fn for_product(mut self, product_id: &str) -> Self {
        self.product_id = Some(product_id.to_string());
        self
    }
}

/// Broadcast hub for committed changes.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChangeFeed { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        trace!(
            store_id = %event.store_id,
            collection = %event.collection,
            document_id = %event.document_id,
            "Publishing change"
        );
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        ChangeFeed::new(DEFAULT_FEED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();

        feed.publish(ChangeEvent::upserted("s1", Collection::Products, "p1").for_product("p1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.collection, Collection::Products);
        assert_eq!(event.product_id.as_deref(), Some("p1"));
        assert_eq!(event.kind, ChangeKind::Upserted);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let feed = ChangeFeed::new(4);
        feed.publish(ChangeEvent::deleted("s1", Collection::Invoices, "INV-01012025-001"));
        assert_eq!(feed.subscriber_count(), 0);
    }
}
