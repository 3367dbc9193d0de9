//! # Database Error Types
//!
//! Failures of the system of record, classified so the data service can
//! tell a lost race from a broken database.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SQLite failure → DbError                            │
//! │                                                                         │
//! │  UNIQUE constraint failed: products.store_id, products.barcode         │
//! │       └──► UniqueViolation { field: "products.barcode" }               │
//! │                                                                         │
//! │  CHECK constraint failed / append-only trigger                         │
//! │       └──► ConstraintViolation                                         │
//! │                                                                         │
//! │  conditional UPDATE matched 0 rows (version moved)                     │
//! │       └──► StockConflict            transient: re-read and retry       │
//! │                                                                         │
//! │  database is locked / pool timed out / pool closed                     │
//! │       └──► QueryFailed / PoolExhausted / ConnectionFailed   transient  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two products with the same barcode in one store
    /// - An invoice id inserted twice (a concurrent device won the race)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A CHECK constraint or append-only trigger rejected the write.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Product stock changed since it was read.
    ///
    /// ## When This Occurs
    /// Another device committed a sale or adjustment for the same product
    /// between our read and our conditional update. The whole transaction
    /// is rolled back; callers re-read and try again.
    #[error("Stock for product {product_id} changed concurrently (expected version {expected_version})")]
    StockConflict {
        product_id: String,
        expected_version: i64,
    },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored JSON column could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Errors that may succeed if the same operation is simply tried again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::StockConflict { .. }
                | DbError::ConnectionFailed(_)
                | DbError::PoolExhausted
                | DbError::Internal(_)
        ) || matches!(self, DbError::QueryFailed(msg) if msg.contains("database is locked"))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => classify_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),
            _ => DbError::Internal(err.to_string()),
        }
    }
}

/// Maps a SQLite error message onto a variant.
///
/// A composite unique key reports every column (`products.store_id,
/// products.barcode`); the last one names the field a cashier cares about.
fn classify_sqlite_message(msg: &str) -> DbError {
    if let Some(columns) = msg.strip_prefix("UNIQUE constraint failed: ") {
        let field = columns
            .rsplit(", ")
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("unknown");
        return DbError::duplicate(field, "unknown");
    }

    if msg.contains("CHECK constraint failed") || msg.contains("append-only") {
        DbError::ConstraintViolation(msg.to_string())
    } else {
        DbError::QueryFailed(msg.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let conflict = DbError::StockConflict {
            product_id: "p1".to_string(),
            expected_version: 3,
        };
        assert!(conflict.is_transient());
        assert!(DbError::PoolExhausted.is_transient());
        assert!(DbError::QueryFailed("database is locked".into()).is_transient());
        assert!(!DbError::not_found("Product", "p1").is_transient());
        assert!(!DbError::duplicate("barcode", "001").is_transient());
    }

    #[test]
    fn test_sqlite_messages() {
        match classify_sqlite_message(
            "UNIQUE constraint failed: products.store_id, products.barcode",
        ) {
            DbError::UniqueViolation { field, .. } => assert_eq!(field, "products.barcode"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            classify_sqlite_message("stock_history is append-only"),
            DbError::ConstraintViolation(_)
        ));
        assert!(classify_sqlite_message("database is locked").is_transient());
    }
}
