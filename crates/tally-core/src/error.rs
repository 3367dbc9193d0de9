//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors                                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-data errors                                                     │
//! │  └── DataError        - What the POS front end sees                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DataError → Frontend              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `Display` text of the stock and barcode variants is shown to staff
//! verbatim, so it names the product and the quantities involved.

use thiserror::Error;

use crate::permissions::Capability;
use crate::quantity::Quantity;
use crate::types::UserRole;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    #[error("Product {0} not found")]
    ProductNotFound(String),

    /// Invoice cannot be found.
    #[error("Invoice {0} not found")]
    InvoiceNotFound(String),

    /// Insufficient stock to complete a sale.
    ///
    /// ## When This Occurs
    /// - An invoice line asks for more than the product has on hand
    /// - Stock management is enabled for the store
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (Duvet Cover × 5)
    ///      │
    ///      ▼
    /// Read product: stock = 3
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Duvet Cover", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Nothing is written. Cashier sees the message as-is.
    /// ```
    #[error("Insufficient stock for {product}. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        product: String,
        available: Quantity,
        requested: Quantity,
    },

    /// Barcode already assigned to another product in the store.
    #[error("Barcode \"{barcode}\" already exists for product: {existing_product}")]
    DuplicateBarcode {
        barcode: String,
        existing_product: String,
    },

    /// Role lacks the capability for the requested operation.
    #[error("Role '{role}' is not allowed to {capability}")]
    PermissionDenied {
        role: UserRole,
        capability: Capability,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Validation-class errors must be shown to the user and never retried.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientStock { .. }
                | CoreError::DuplicateBarcode { .. }
                | CoreError::PermissionDenied { .. }
                | CoreError::Validation(_)
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic or storage call runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., bad date, bad invoice id).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Ledger entry does not satisfy new = previous + quantity.
    #[error("Unbalanced stock entry: {previous} + {quantity} != {new}")]
    UnbalancedEntry {
        previous: Quantity,
        quantity: Quantity,
        new: Quantity,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
