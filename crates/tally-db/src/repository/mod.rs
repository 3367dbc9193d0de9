//! # Repository Module
//!
//! Database repository implementations for Tally POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  tally-data service                                                    │
//! │       │                                                                 │
//! │       │  db.invoices().commit_sale(store, sale, now)                   │
//! │       ▼                                                                 │
//! │  InvoiceRepository                                                     │
//! │  ├── list / get / exists / ids_with_prefix                             │
//! │  ├── upsert (metadata only once stored)                                │
//! │  └── commit_sale (stock + invoice + ledger outbox, one transaction)    │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite ──── commit ───► ChangeFeed::publish                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every repository method takes the store id explicitly; nothing in this
//! layer remembers a "current" store.
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Catalog and version-guarded stock writes
//! - [`InvoiceRepository`] - Invoices and the atomic sale commit
//! - [`StockHistoryRepository`] - Append-only stock ledger
//! - [`LedgerOutboxRepository`] - Ledger entries awaiting delivery
//! - [`DailyCounterRepository`] - Invoice sequence per store and day
//! - [`SettingsRepository`] - Merged settings document
//! - [`CustomerRepository`], [`CategoryRepository`], [`StaffRepository`]

pub mod category;
pub mod customer;
pub mod daily_counter;
pub mod invoice;
pub mod ledger_outbox;
pub mod product;
pub mod settings;
pub mod staff;
pub mod stock_history;

pub use category::CategoryRepository;
pub use customer::CustomerRepository;
pub use daily_counter::{CounterStamp, DailyCounterRepository};
pub use invoice::{CommitOutcome, InvoiceRepository, SaleCommit, StockDecrement};
pub use ledger_outbox::{LedgerOutboxRepository, LedgerTask};
pub use product::ProductRepository;
pub use settings::SettingsRepository;
pub use staff::StaffRepository;
pub use stock_history::StockHistoryRepository;
