//! # Domain Types
//!
//! Core domain types for Tally POS.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │    Invoice      │   │  StockHistory   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id (INV-...)   │   │  product_id     │       │
//! │  │  barcode        │◄──│  items[]        │──►│  quantity (+/-) │       │
//! │  │  stock          │   │  created_by     │   │  previous/new   │       │
//! │  │  version        │   │  grand_total    │   │  reference_id   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   DailyCounter  │   │ BusinessSettings│   │   Collection    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  date, date_key │   │  stock toggle   │   │  products       │       │
//! │  │  last_number    │   │  currency       │   │  invoices ...   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Store Scoping
//! Every record lives inside exactly one store. Most types do not carry the
//! store id themselves: repositories and services take it as an argument.
//! Ledger entries and daily counters carry it because they are audit records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Tax Rate
// =============================================================================

/// VAT rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1500 bps = 15% (a common VAT rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage (for convenience).
    pub fn from_percentage(pct: f64) -> Self {
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// User Role
// =============================================================================

/// Staff role within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Store owner. Full access.
    Admin,
    /// Back-office manager.
    Manager,
    /// Till operator.
    Cashier,
    /// Floor sales staff.
    Salesman,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Cashier => "cashier",
            UserRole::Salesman => "salesman",
        }
    }
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::Cashier
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "cashier" => Ok(UserRole::Cashier),
            "salesman" => Ok(UserRole::Salesman),
            _ => Err(ValidationError::NotAllowed {
                field: "role".to_string(),
                allowed: vec![
                    "admin".to_string(),
                    "manager".to_string(),
                    "cashier".to_string(),
                    "salesman".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Collection
// =============================================================================

/// The logical collections kept per store.
///
/// Used as the resource half of cache keys and as the topic of change
/// events published by the database layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Products,
    Customers,
    Invoices,
    Employees,
    Attendance,
    Salaries,
    Categories,
    StockHistory,
    DailyCounters,
    Settings,
}

impl Collection {
    /// Collections mirrored by the client cache.
    pub const CACHED: [Collection; 7] = [
        Collection::Products,
        Collection::Customers,
        Collection::Invoices,
        Collection::Employees,
        Collection::Attendance,
        Collection::Salaries,
        Collection::Categories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Customers => "customers",
            Collection::Invoices => "invoices",
            Collection::Employees => "employees",
            Collection::Attendance => "attendance",
            Collection::Salaries => "salaries",
            Collection::Categories => "categories",
            Collection::StockHistory => "stockHistory",
            Collection::DailyCounters => "dailyCounters",
            Collection::Settings => "settings",
        }
    }

    /// Whether the client cache mirrors this collection.
    pub fn is_cached(&self) -> bool {
        Self::CACHED.contains(self)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Collection::Products,
            Collection::Customers,
            Collection::Invoices,
            Collection::Employees,
            Collection::Attendance,
            Collection::Salaries,
            Collection::Categories,
            Collection::StockHistory,
            Collection::DailyCounters,
            Collection::Settings,
        ];
        all.into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "collection".to_string(),
                reason: format!("unknown collection '{}'", s),
            })
    }
}

// =============================================================================
// Product
// =============================================================================

/// Whether a catalog entry is a physical good or a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Product,
    Service,
}

impl Default for ProductKind {
    fn default() -> Self {
        ProductKind::Product
    }
}

/// A product or service available for sale.
///
/// `stock` is authoritative. It only changes through the invoice writer or
/// an explicit stock adjustment, and each change leaves a ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Stable key within the store.
    pub id: String,

    /// Display name shown to cashier and on the invoice.
    pub name: String,

    /// Scannable code, unique within the store when present.
    pub barcode: Option<String>,

    /// Category id or name.
    pub category: String,

    /// Selling price in minor units.
    pub price_cents: i64,

    /// Cost basis in minor units.
    pub purchase_price_cents: Option<i64>,

    /// VAT in basis points.
    pub vat_bps: u32,

    /// Current stock level in the product's unit.
    #[ts(type = "number")]
    pub stock: Quantity,

    /// Unit of measure (kg, pc, set...).
    pub unit: String,

    /// Good or service.
    pub kind: ProductKind,

    pub image_url: Option<String>,

    /// Optimistic concurrency token, bumped on every stock write.
    #[serde(default)]
    pub version: i64,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Returns the VAT rate.
    #[inline]
    pub fn vat(&self) -> TaxRate {
        TaxRate::from_bps(self.vat_bps)
    }

    /// Whether the barcode is absent or blank.
    pub fn needs_barcode(&self) -> bool {
        self.barcode
            .as_deref()
            .map(|b| b.trim().is_empty())
            .unwrap_or(true)
    }
}

// =============================================================================
// Customer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub address: String,
    pub email: Option<String>,
    pub nid_card: Option<String>,
    pub card_number: Option<String>,
    /// Outstanding balance in minor units.
    pub total_due_cents: i64,
}

// =============================================================================
// Category
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// UI colour hint.
    pub color: Option<String>,
}

// =============================================================================
// Invoice
// =============================================================================

/// Delivery status of an invoice (laundry orders are picked up later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Delivered,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum PaymentMode {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Cash"))]
    Cash,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Card"))]
    Card,
    #[serde(rename = "Pay Later")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Pay Later"))]
    PayLater,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Deposit"))]
    Deposit,
}

impl Default for PaymentMode {
    fn default() -> Self {
        PaymentMode::Cash
    }
}

/// How the invoice-level discount was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// A fixed amount in minor units.
    Value,
    /// A percentage of the subtotal.
    Percentage,
}

/// Who rang up the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceCreator {
    pub name: String,
    pub role: UserRole,
}

/// A sold line. Snapshot of the product at the time of sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub barcode: Option<String>,
    pub category: String,
    pub unit: String,
    pub kind: ProductKind,
    pub vat_bps: u32,
    #[ts(type = "number")]
    pub quantity: Quantity,
    /// Catalog price at the time of sale.
    pub original_price_cents: i64,
    /// Price actually charged per unit.
    pub sale_price_cents: i64,
    #[serde(default)]
    pub price_adjusted: bool,
    pub adjustment_reason: Option<String>,
    pub adjusted_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub adjustment_timestamp: Option<DateTime<Utc>>,
}

impl CartItem {
    /// Builds a line from a catalog product at its list price.
    pub fn from_product(product: &Product, quantity: Quantity) -> Self {
        CartItem {
            product_id: product.id.clone(),
            name: product.name.clone(),
            barcode: product.barcode.clone(),
            category: product.category.clone(),
            unit: product.unit.clone(),
            kind: product.kind,
            vat_bps: product.vat_bps,
            quantity,
            original_price_cents: product.price_cents,
            sale_price_cents: product.price_cents,
            price_adjusted: false,
            adjustment_reason: None,
            adjusted_by: None,
            adjustment_timestamp: None,
        }
    }

    /// Overrides the unit price, recording who did it and why.
    pub fn adjust_price(
        &mut self,
        sale_price_cents: i64,
        reason: Option<String>,
        adjusted_by: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.sale_price_cents = sale_price_cents;
        self.price_adjusted = sale_price_cents != self.original_price_cents;
        self.adjustment_reason = reason;
        self.adjusted_by = Some(adjusted_by.into());
        self.adjustment_timestamp = Some(at);
    }

    /// Line total before VAT.
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.sale_price_cents).multiply_quantity(self.quantity)
    }
}

/// A customer invoice.
///
/// The id (`INV-DDMMYYYY-NNN`) is written exactly once for stock purposes;
/// later saves of the same id only update metadata such as `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Invoice {
    pub id: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub items: Vec<CartItem>,
    pub subtotal_cents: i64,
    pub total_vat_cents: i64,
    pub discount_cents: i64,
    pub discount_type: Option<DiscountType>,
    /// Percentage discount in basis points when `discount_type` is percentage.
    pub discount_bps: Option<u32>,
    pub grand_total_cents: i64,
    pub paid_amount_cents: i64,
    pub due_amount_cents: i64,
    /// Business date of the sale.
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    pub status: InvoiceStatus,
    pub payment_mode: PaymentMode,
    pub created_by: Option<InvoiceCreator>,
    pub pdf_url: Option<String>,
}

impl Invoice {
    /// Display name of the creator, `"System"` when unknown.
    pub fn performer_name(&self) -> String {
        self.created_by
            .as_ref()
            .map(|c| c.name.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(crate::SYSTEM_PERFORMER)
            .to_string()
    }

    /// Role of the creator, cashier when unknown.
    pub fn performer_role(&self) -> UserRole {
        self.created_by
            .as_ref()
            .map(|c| c.role)
            .unwrap_or(UserRole::Cashier)
    }

    #[inline]
    pub fn grand_total(&self) -> Money {
        Money::from_cents(self.grand_total_cents)
    }
}

// =============================================================================
// Staff
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub designation: String,
    pub phone: String,
    pub salary_cents: i64,
    #[ts(as = "String")]
    pub join_date: NaiveDate,
    pub status: EmployeeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    HalfDay,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AttendanceRecord {
    pub id: String,
    pub employee_id: String,
    #[ts(as = "String")]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalaryRecord {
    pub id: String,
    pub employee_id: String,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub date: NaiveDate,
    /// Pay period, e.g. "2025-01".
    pub month: String,
}

// =============================================================================
// Business Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PrintFormat {
    A4,
    Thermal,
}

/// The per-store settings document.
///
/// Every field is optional so that saves can merge: absent fields keep
/// whatever value the stored document already has.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct BusinessSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_format: Option<PrintFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    /// Stock tracking toggle. Absent means enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_management_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_upload_enabled: Option<bool>,
    /// Store-wide invoice sequence used before daily counters existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_invoice_number: Option<i64>,
}

impl BusinessSettings {
    /// Stock management is on unless explicitly switched off.
    pub fn stock_management_enabled(&self) -> bool {
        self.stock_management_enabled.unwrap_or(true)
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Why a product's stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum StockChangeType {
    Add,
    Remove,
    Adjust,
    Initial,
    Sale,
    Return,
    Damage,
}

impl StockChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockChangeType::Add => "add",
            StockChangeType::Remove => "remove",
            StockChangeType::Adjust => "adjust",
            StockChangeType::Initial => "initial",
            StockChangeType::Sale => "sale",
            StockChangeType::Return => "return",
            StockChangeType::Damage => "damage",
        }
    }
}

impl fmt::Display for StockChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable ledger entry.
///
/// ## Invariant
/// `new_stock == previous_stock + quantity` at the time of writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockHistory {
    pub id: String,
    pub store_id: String,
    pub product_id: String,
    /// Product name at the time of the change.
    pub product_name: String,
    pub barcode: Option<String>,
    pub unit: Option<String>,
    pub change_type: StockChangeType,
    /// Signed delta. Negative for sales and removals.
    #[ts(type = "number")]
    pub quantity: Quantity,
    #[ts(type = "number")]
    pub previous_stock: Quantity,
    #[ts(type = "number")]
    pub new_stock: Quantity,
    pub reason: Option<String>,
    pub performed_by: String,
    pub performed_by_role: UserRole,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    /// Invoice id or other external reference.
    pub reference_id: Option<String>,
}

impl StockHistory {
    /// Checks the ledger arithmetic invariant.
    pub fn is_balanced(&self) -> bool {
        self.previous_stock + self.quantity == self.new_stock
    }
}

/// A ledger entry before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStockEntry {
    pub product_id: String,
    pub product_name: String,
    pub barcode: Option<String>,
    pub unit: Option<String>,
    pub change_type: StockChangeType,
    pub quantity: Quantity,
    pub previous_stock: Quantity,
    pub new_stock: Quantity,
    pub reason: Option<String>,
    pub performed_by: String,
    pub performed_by_role: UserRole,
    pub reference_id: Option<String>,
}

impl NewStockEntry {
    /// Entry describing a move of `product` from `previous` to `new` stock.
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        product: &Product,
        change_type: StockChangeType,
        previous: Quantity,
        new: Quantity,
        reason: impl Into<String>,
        performed_by: impl Into<String>,
        performed_by_role: UserRole,
        reference_id: Option<String>,
    ) -> Self {
        NewStockEntry {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            barcode: product.barcode.clone(),
            unit: Some(product.unit.clone()),
            change_type,
            quantity: new - previous,
            previous_stock: previous,
            new_stock: new,
            reason: Some(reason.into()),
            performed_by: performed_by.into(),
            performed_by_role,
            reference_id,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.previous_stock + self.quantity == self.new_stock
    }
}

// =============================================================================
// Daily Counter
// =============================================================================

/// Per-store, per-day invoice sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DailyCounter {
    pub store_id: String,
    /// Calendar date (YYYY-MM-DD).
    #[ts(as = "String")]
    pub date: NaiveDate,
    /// DDMMYYYY as it appears in invoice ids.
    pub date_key: String,
    pub last_number: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub fixed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_by: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: i64) -> Product {
        Product {
            id: "p1".to_string(),
            name: "Shirt Wash".to_string(),
            barcode: Some("001".to_string()),
            category: "wash".to_string(),
            price_cents: 250,
            purchase_price_cents: None,
            vat_bps: 1500,
            stock: Quantity::units(stock),
            unit: "pc".to_string(),
            kind: ProductKind::Service,
            image_url: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("salesman".parse::<UserRole>().unwrap(), UserRole::Salesman);
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::StockHistory.as_str(), "stockHistory");
        assert_eq!(
            "dailyCounters".parse::<Collection>().unwrap(),
            Collection::DailyCounters
        );
        assert!(Collection::Products.is_cached());
        assert!(!Collection::StockHistory.is_cached());
    }

    #[test]
    fn test_needs_barcode() {
        let mut p = product(1);
        assert!(!p.needs_barcode());
        p.barcode = Some("   ".to_string());
        assert!(p.needs_barcode());
        p.barcode = None;
        assert!(p.needs_barcode());
    }

    #[test]
    fn test_transition_entry_is_balanced() {
        let p = product(10);
        let entry = NewStockEntry::transition(
            &p,
            StockChangeType::Damage,
            Quantity::units(10),
            Quantity::units(7),
            "Torn",
            "Rafi",
            UserRole::Manager,
            None,
        );
        assert_eq!(entry.quantity, Quantity::units(-3));
        assert!(entry.is_balanced());
    }

    #[test]
    fn test_invoice_performer_fallbacks() {
        let invoice = Invoice {
            id: "INV-01012025-001".to_string(),
            customer_name: "Walk-in".to_string(),
            customer_phone: None,
            customer_address: None,
            items: vec![],
            subtotal_cents: 0,
            total_vat_cents: 0,
            discount_cents: 0,
            discount_type: None,
            discount_bps: None,
            grand_total_cents: 0,
            paid_amount_cents: 0,
            due_amount_cents: 0,
            date: Utc::now(),
            created_at: None,
            status: InvoiceStatus::Pending,
            payment_mode: PaymentMode::Cash,
            created_by: None,
            pdf_url: None,
        };
        assert_eq!(invoice.performer_name(), "System");
        assert_eq!(invoice.performer_role(), UserRole::Cashier);
    }

    #[test]
    fn test_settings_stock_toggle_defaults_on() {
        assert!(BusinessSettings::default().stock_management_enabled());
        let off = BusinessSettings {
            stock_management_enabled: Some(false),
            ..Default::default()
        };
        assert!(!off.stock_management_enabled());
    }

    #[test]
    fn test_payment_mode_serde() {
        let json = serde_json::to_string(&PaymentMode::PayLater).unwrap();
        assert_eq!(json, "\"Pay Later\"");
    }

    #[test]
    fn test_price_adjustment_flags() {
        let p = product(5);
        let mut item = CartItem::from_product(&p, Quantity::units(2));
        assert!(!item.price_adjusted);
        item.adjust_price(200, Some("Loyal customer".into()), "Rafi", Utc::now());
        assert!(item.price_adjusted);
        assert_eq!(item.line_total().cents(), 400);
    }

    #[test]
    fn test_weighed_line_from_json() {
        let json = serde_json::json!({
            "product_id": "p-detergent",
            "name": "Loose Detergent",
            "barcode": null,
            "category": "supplies",
            "unit": "kg",
            "kind": "product",
            "vat_bps": 0,
            "quantity": 2.5,
            "original_price_cents": 400,
            "sale_price_cents": 400,
            "adjustment_reason": null,
            "adjusted_by": null,
            "adjustment_timestamp": null
        });
        let item: CartItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.quantity, Quantity::from_milli(2_500));
        assert_eq!(item.line_total().cents(), 1_000);
        assert_eq!(serde_json::to_value(&item).unwrap()["quantity"], serde_json::json!(2.5));
    }
}
