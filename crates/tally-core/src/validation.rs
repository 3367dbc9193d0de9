//! # Validation Module
//!
//! Input checks run by the data service before anything touches storage.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: POS front end    basic form checks, instant feedback         │
//! │  Layer 2: THIS MODULE      business rules (ids, quantities, ledger)    │
//! │  Layer 3: SQLite           NOT NULL, UNIQUE, CHECK constraints         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::invoice_number::is_valid_invoice_id;
use crate::quantity::Quantity;
use crate::types::{Invoice, NewStockEntry, Product};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest barcode the scanners we support will emit.
pub const MAX_BARCODE_LEN: usize = 50;

fn required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Store ids scope every query; an empty one would read across tenants.
pub fn validate_store_id(store_id: &str) -> ValidationResult<()> {
    required("store_id", store_id)
}

/// Validates a product name.
///
/// ```rust
/// use tally_core::validation::validate_product_name;
///
/// assert!(validate_product_name("Duvet Dry Clean").is_ok());
/// assert!(validate_product_name("  ").is_err());
/// ```
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    required("name", name)?;
    if name.trim().len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }
    Ok(())
}

/// Barcodes: letters, digits, hyphen and underscore only.
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    let barcode = barcode.trim();
    required("barcode", barcode)?;

    if barcode.len() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_BARCODE_LEN,
        });
    }

    if !barcode
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

pub fn validate_product(product: &Product) -> ValidationResult<()> {
    required("id", &product.id)?;
    validate_product_name(&product.name)?;
    if let Some(ref code) = product.barcode {
        if !code.trim().is_empty() {
            validate_barcode(code)?;
        }
    }
    if product.price_cents < 0 {
        return Err(ValidationError::Negative {
            field: "price".to_string(),
        });
    }
    Ok(())
}

/// Quantity sold on an invoice line. Fractions are allowed for weighed goods.
pub fn validate_quantity(quantity: Quantity) -> ValidationResult<()> {
    if !quantity.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    Ok(())
}

/// Target level for a manual stock adjustment.
pub fn validate_stock_level(stock: Quantity) -> ValidationResult<()> {
    if stock.is_negative() {
        return Err(ValidationError::Negative {
            field: "stock".to_string(),
        });
    }
    Ok(())
}

/// Structural checks on an invoice before it is written.
pub fn validate_invoice(invoice: &Invoice) -> ValidationResult<()> {
    if !is_valid_invoice_id(&invoice.id) {
        return Err(ValidationError::InvalidFormat {
            field: "invoice id".to_string(),
            reason: format!("'{}' is not an INV- id", invoice.id),
        });
    }
    required("customer_name", &invoice.customer_name)?;

    if invoice.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }
    for item in &invoice.items {
        required("product_id", &item.product_id)?;
        validate_quantity(item.quantity)?;
    }
    Ok(())
}

/// Ledger arithmetic: `new_stock == previous_stock + quantity`.
pub fn validate_stock_entry(entry: &NewStockEntry) -> ValidationResult<()> {
    required("product_id", &entry.product_id)?;
    if !entry.is_balanced() {
        return Err(ValidationError::UnbalancedEntry {
            previous: entry.previous_stock,
            quantity: entry.quantity,
            new: entry.new_stock,
        });
    }
    Ok(())
}
