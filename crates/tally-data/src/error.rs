//! # Data Service Error Types
//!
//! Error types for the data service.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Data Error Categories                              │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Domain      │  │      Database           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Core(..)       │  │  Database(..)           │ │
//! │  │  ConfigLoad..   │  │  insufficient   │  │  stock conflicts and    │ │
//! │  │  ConfigSave..   │  │  stock, barcode │  │  locks are retryable    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Cache       │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  CacheFailed    │  │  ShuttingDown   │                              │
//! │  │  Serialization  │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Domain and database errors are wrapped transparently so the text the
//! cashier sees is exactly the text the lower layer produced.

use thiserror::Error;

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;

/// Result type alias for data service operations.
pub type DataResult<T> = Result<T, DataError>;

/// Errors surfaced by the data service.
#[derive(Debug, Error)]
pub enum DataError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid data configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Business rule violation (insufficient stock, duplicate barcode, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// System of record failure.
    #[error(transparent)]
    Database(#[from] DbError),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Cache storage could not be read or written.
    #[error("Cache error: {0}")]
    CacheFailed(String),

    /// Cached payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Background worker is shutting down.
    #[error("Data service is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for DataError {
    fn from(err: ValidationError) -> Self {
        DataError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for DataError {
    fn from(err: toml::de::Error) -> Self {
        DataError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for DataError {
    fn from(err: toml::ser::Error) -> Self {
        DataError::ConfigSaveFailed(err.to_string())
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        DataError::CacheFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl DataError {
    /// Returns true if the operation may succeed when simply tried again.
    ///
    /// ## Retryable Errors
    /// - Stock version conflicts (re-read and re-validate)
    /// - Locked database, lost connections, exhausted pool
    ///
    /// ## Non-Retryable Errors
    /// - Insufficient stock, duplicate barcode, permission denied
    /// - Not found, constraint violations
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::Database(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if a product changed between read and commit.
    pub fn is_stock_conflict(&self) -> bool {
        matches!(self, DataError::Database(DbError::StockConflict { .. }))
    }

    /// Returns true if this error must be shown to the user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, DataError::Core(e) if e.is_user_facing())
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DataError::InvalidConfig(_)
                | DataError::ConfigLoadFailed(_)
                | DataError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(DataError::Database(DbError::StockConflict {
            product_id: "p1".into(),
            expected_version: 3,
        })
        .is_retryable());
        assert!(DataError::Database(DbError::PoolExhausted).is_retryable());

        assert!(!DataError::Core(CoreError::InsufficientStock {
            product: "Hanger".into(),
            available: 1.into(),
            requested: 2.into(),
        })
        .is_retryable());
        assert!(!DataError::Database(DbError::not_found("Product", "p1")).is_retryable());
        assert!(!DataError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_stock_conflict_detection() {
        let err = DataError::Database(DbError::StockConflict {
            product_id: "p1".into(),
            expected_version: 0,
        });
        assert!(err.is_stock_conflict());
        assert!(!DataError::ShuttingDown.is_stock_conflict());
    }

    #[test]
    fn test_domain_messages_pass_through() {
        let err: DataError = CoreError::DuplicateBarcode {
            barcode: "002".into(),
            existing_product: "Shirt Press".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Barcode \"002\" already exists for product: Shirt Press"
        );
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_config_errors() {
        assert!(DataError::ConfigLoadFailed("missing".into()).is_config_error());
        assert!(!DataError::ShuttingDown.is_config_error());
    }
}
