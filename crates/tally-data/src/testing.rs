//! Fixtures shared by the unit tests of this crate.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use tally_core::{
    CartItem, Discount, Invoice, InvoiceCreator, InvoiceStatus, InvoiceTotals, Money,
    PaymentMode, Product, ProductKind, Quantity, UserRole,
};
use tally_db::{Database, DbConfig};

use crate::cache::Cache;
use crate::clock::{ManualClock, SharedClock};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
}

pub struct Fixture {
    pub db: Database,
    pub clock: ManualClock,
    pub cache: Cache,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new(start());
        let cache = Cache::in_memory(std::time::Duration::from_secs(300), Arc::new(clock.clone()));
        Fixture { db, clock, cache }
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }

    /// Inserts `product` directly, without a ledger entry.
    pub async fn stock(&self, store_id: &str, product: &Product) -> Product {
        self.db.products().upsert(store_id, product, start()).await.unwrap()
    }
}

pub fn product(id: &str, name: &str, stock: i64) -> Product {
    Product {
        id: id.to_string(),
        name: name.to_string(),
        barcode: None,
        category: "supplies".to_string(),
        price_cents: 500,
        purchase_price_cents: Some(300),
        vat_bps: 0,
        stock: Quantity::units(stock),
        unit: "pc".to_string(),
        kind: ProductKind::Product,
        image_url: None,
        version: 0,
        updated_at: start(),
    }
}

/// An invoice selling whole units of each product, money columns computed.
pub fn invoice(id: &str, lines: &[(&Product, i64)]) -> Invoice {
    invoice_of(
        id,
        lines
            .iter()
            .map(|(p, qty)| CartItem::from_product(p, Quantity::units(*qty)))
            .collect(),
    )
}

pub fn invoice_of(id: &str, items: Vec<CartItem>) -> Invoice {
    let mut invoice = Invoice {
        id: id.to_string(),
        customer_name: "Walk-in".to_string(),
        customer_phone: None,
        customer_address: None,
        items,
        subtotal_cents: 0,
        total_vat_cents: 0,
        discount_cents: 0,
        discount_type: None,
        discount_bps: None,
        grand_total_cents: 0,
        paid_amount_cents: 0,
        due_amount_cents: 0,
        date: start(),
        created_at: Some(start()),
        status: InvoiceStatus::Pending,
        payment_mode: PaymentMode::Cash,
        created_by: Some(InvoiceCreator {
            name: "Mina".to_string(),
            role: UserRole::Cashier,
        }),
        pdf_url: None,
    };

    let totals = InvoiceTotals::compute(&invoice.items, Discount::None, Money::zero());
    let paid = totals.grand_total;
    InvoiceTotals::compute(&invoice.items, Discount::None, paid).apply_to(&mut invoice, Discount::None);
    invoice
}
