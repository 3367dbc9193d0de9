//! # tally-core: Pure Business Logic for Tally POS
//!
//! Domain types and rules for the inventory and invoicing core. Nothing in
//! this crate performs I/O or reads the clock; callers pass `now` in.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            POS front end (checkout, products, reports)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   tally-data   cache · ledger · numbering · writer · feeds      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   types · money · quantity · totals · invoice_number · barcode  │   │
//! │  │   history · permissions · validation                            │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              tally-db (SQLite system of record)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Invoice, StockHistory, ...)
//! - [`money`] - Integer money in minor units
//! - [`quantity`] - Fixed-point stock and line quantities
//! - [`totals`] - Invoice subtotal / VAT / discount arithmetic
//! - [`invoice_number`] - `INV-DDMMYYYY-NNN` formatting and fallbacks
//! - [`barcode`] - Default 3-digit barcode sequence
//! - [`history`] - Stock ledger query filters
//! - [`permissions`] - Role to capability mapping
//! - [`validation`] - Input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::invoice_number::format_invoice_id;
//! use tally_core::permissions::{can, Capability};
//! use tally_core::UserRole;
//!
//! assert_eq!(format_invoice_id("01012025", 1), "INV-01012025-001");
//! assert!(!can(UserRole::Cashier, Capability::AdjustStock));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod barcode;
pub mod error;
pub mod history;
pub mod invoice_number;
pub mod money;
pub mod permissions;
pub mod quantity;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use history::StockHistoryFilter;
pub use money::Money;
pub use permissions::Capability;
pub use quantity::Quantity;
pub use totals::{Discount, InvoiceTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// How long a cached collection stays fresh.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

/// Attempts made at the atomic sale commit before giving up.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Name recorded on ledger entries when no staff member is known.
pub const SYSTEM_PERFORMER: &str = "System";
