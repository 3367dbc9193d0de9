//! # tally-data: Data Service for Tally POS
//!
//! Store-scoped data access for the POS front end: cached reads, stock-aware
//! invoice saves, invoice numbering, the stock ledger and live push updates.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Data Service Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  DataService (service.rs)                        │  │
//! │  │                                                                  │  │
//! │  │  Read-through lists, saves, deletes, settings, cache control    │  │
//! │  └───────┬──────────────┬───────────────┬──────────────┬────────────┘  │
//! │          ▼              ▼               ▼              ▼               │
//! │  ┌──────────────┐ ┌────────────┐ ┌──────────────┐ ┌────────────────┐  │
//! │  │InvoiceWriter │ │StockLedger │ │InvoiceNumber-│ │PushDistributor │  │
//! │  │              │ │            │ │ing           │ │                │  │
//! │  │ validate →   │ │ adjust,    │ │ atomic daily │ │ snapshot per   │  │
//! │  │ atomic commit│ │ product    │ │ counter with │ │ change event,  │  │
//! │  │ → outbox     │ │ save,      │ │ scan and     │ │ coalesced      │  │
//! │  │              │ │ history    │ │ timestamp    │ │                │  │
//! │  │              │ │            │ │ fallbacks    │ │                │  │
//! │  └──────┬───────┘ └────────────┘ └──────────────┘ └────────────────┘  │
//! │         │                                                              │
//! │         ▼                                                              │
//! │  ┌──────────────────────┐   ┌─────────────────────────────────────┐   │
//! │  │ LedgerOutboxProcessor│   │ Cache (memory or sqlite storage)    │   │
//! │  │ delivers queued sale │   │ TTL per (store, collection)         │   │
//! │  │ entries to the ledger│   │                                     │   │
//! │  └──────────────────────┘   └─────────────────────────────────────┘   │
//! │                                                                         │
//! │  Below: tally-db (SQLite system of record + change feed)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`service`] - The `DataService` facade
//! - [`cache`] - TTL cache over pluggable storage
//! - [`invoice_writer`] - Stock-aware, idempotent invoice saves
//! - [`ledger`] - Stock adjustments, product saves, ledger reads
//! - [`numbering`] - Daily invoice numbers
//! - [`distributor`] - Live collection snapshots
//! - [`outbox`] - Ledger outbox worker
//! - [`retry`] - Exponential backoff for commits
//! - [`config`] - Configuration (file, environment, defaults)
//! - [`clock`] - Injectable time source
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_data::{DataConfig, DataService};
//!
//! let mut service = DataService::open(DataConfig::load_or_default(None)).await?;
//! service.start();
//!
//! let products = service.get_products("store-1").await?;
//! let _feed = service.subscribe_invoices("store-1", |invoices| {
//!     println!("{} invoices", invoices.len());
//! });
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod clock;
pub mod config;
pub mod distributor;
pub mod error;
pub mod invoice_writer;
pub mod ledger;
pub mod numbering;
pub mod outbox;
pub mod retry;
pub mod service;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{Cache, CacheKey, CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CacheBackend, DataConfig};
pub use distributor::{PushDistributor, Subscription};
pub use error::{DataError, DataResult};
pub use invoice_writer::{InvoiceWriter, SaleReceipt};
pub use ledger::{Actor, StockAdjustment, StockLedger};
pub use numbering::InvoiceNumbering;
pub use outbox::{DeliveryReport, LedgerDelivery, LedgerOutboxHandle, LedgerOutboxProcessor};
pub use retry::RetryPolicy;
pub use service::DataService;
