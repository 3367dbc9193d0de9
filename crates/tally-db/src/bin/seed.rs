//! # Seed Data Generator
//!
//! Populates a database with a demo laundry store for development.
//!
//! ## Usage
//! ```bash
//! # Seed the default store into ./tally_dev.db
//! cargo run -p tally-db --bin seed
//!
//! # Specify store id and database path
//! cargo run -p tally-db --bin seed -- --store demo-2 --db ./data/tally.db
//!
//! # More logging
//! RUST_LOG=tally_db=debug cargo run -p tally-db --bin seed
//! ```
//!
//! ## Generated Data
//! - Business settings (name, currency, stock management on)
//! - Categories: Wash & Fold, Dry Clean, Ironing, Supplies
//! - Services and retail supplies with 3-digit barcodes `001`, `002`, ...
//! - An `initial` ledger entry for every product that starts with stock
//! - A few regular customers, one with an outstanding balance

use chrono::Utc;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::{
    BusinessSettings, Category, Customer, NewStockEntry, PrintFormat, Product, ProductKind,
    Quantity, StockChangeType, UserRole,
};
use tally_db::{materialize, Database, DbConfig};

/// (category id, category name, colour)
const CATEGORIES: &[(&str, &str, &str)] = &[
    ("wash", "Wash & Fold", "#0ea5e9"),
    ("dry", "Dry Clean", "#8b5cf6"),
    ("iron", "Ironing", "#f59e0b"),
    ("supplies", "Supplies", "#10b981"),
];

/// (category id, name, unit, price in minor units, vat bps, starting stock, kind)
const PRODUCTS: &[(&str, &str, &str, i64, u32, Quantity, ProductKind)] = &[
    ("wash", "Shirt Wash", "pc", 250, 0, Quantity::zero(), ProductKind::Service),
    ("wash", "Bed Sheet Wash", "pc", 600, 0, Quantity::zero(), ProductKind::Service),
    ("wash", "Wash & Fold (per kg)", "kg", 1200, 0, Quantity::zero(), ProductKind::Service),
    ("dry", "Suit Dry Clean", "set", 4500, 750, Quantity::zero(), ProductKind::Service),
    ("dry", "Saree Dry Clean", "pc", 3500, 750, Quantity::zero(), ProductKind::Service),
    ("dry", "Duvet Cleaning", "pc", 5000, 750, Quantity::zero(), ProductKind::Service),
    ("iron", "Shirt Press", "pc", 150, 0, Quantity::zero(), ProductKind::Service),
    ("iron", "Trouser Press", "pc", 150, 0, Quantity::zero(), ProductKind::Service),
    ("supplies", "Garment Bag", "pc", 300, 1500, Quantity::units(120), ProductKind::Product),
    ("supplies", "Hanger (pack of 10)", "pack", 800, 1500, Quantity::units(40), ProductKind::Product),
    ("supplies", "Stain Remover 500ml", "bottle", 1900, 1500, Quantity::units(24), ProductKind::Product),
    ("supplies", "Fabric Softener 1L", "bottle", 2400, 1500, Quantity::units(18), ProductKind::Product),
    ("supplies", "Loose Detergent", "kg", 400, 1500, Quantity::from_milli(12_500), ProductKind::Product),
];

/// (name, phone, address, outstanding due in minor units)
const CUSTOMERS: &[(&str, &str, &str, i64)] = &[
    ("Nadia Rahman", "+880 1711 000001", "House 7, Road 3", 0),
    ("Karim Uddin", "+880 1711 000002", "Flat 4B, Lake View", 1500),
    ("Sadia Akter", "+880 1711 000003", "22 Station Road", 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut store_id = String::from("demo-store");
    let mut db_path = String::from("./tally_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--store" | "-s" => {
                if i + 1 < args.len() {
                    store_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --store <ID>   Store id to seed (default: demo-store)");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, store_id = %store_id, "Seeding demo store");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().list(&store_id).await?;
    if !existing.is_empty() {
        warn!(
            count = existing.len(),
            "Store already has products, skipping seed. Delete the database file to regenerate."
        );
        return Ok(());
    }

    let now = Utc::now();

    db.settings()
        .merge(
            &store_id,
            &BusinessSettings {
                name: Some("Fresh Fold Laundry".to_string()),
                address: Some("12 Lake Road".to_string()),
                phone: Some("+880 1700 000000".to_string()),
                owner_name: Some("Owner".to_string()),
                print_format: Some(PrintFormat::Thermal),
                currency: Some("BDT".to_string()),
                stock_management_enabled: Some(true),
                ..Default::default()
            },
            now,
        )
        .await?;

    for (id, name, color) in CATEGORIES {
        db.categories()
            .upsert(
                &store_id,
                &Category {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: None,
                    color: Some(color.to_string()),
                },
            )
            .await?;
    }
    info!(count = CATEGORIES.len(), "Categories created");

    let mut ledger_entries = 0;
    for (idx, (category, name, unit, price, vat, stock, kind)) in PRODUCTS.iter().enumerate() {
        let product = Product {
            id: format!("prod-{:03}", idx + 1),
            name: name.to_string(),
            barcode: Some(format!("{:03}", idx + 1)),
            category: category.to_string(),
            price_cents: *price,
            purchase_price_cents: (*kind == ProductKind::Product).then(|| price * 6 / 10),
            vat_bps: *vat,
            stock: *stock,
            unit: unit.to_string(),
            kind: *kind,
            image_url: None,
            version: 0,
            updated_at: now,
        };

        let entry = stock.is_positive().then(|| {
            materialize(
                &store_id,
                &NewStockEntry::transition(
                    &product,
                    StockChangeType::Initial,
                    Quantity::zero(),
                    *stock,
                    "Initial stock",
                    "Seeder",
                    UserRole::Admin,
                    None,
                ),
                now,
            )
        });

        if let Err(e) = db
            .products()
            .save(&store_id, &product, None, entry.as_ref(), now)
            .await
        {
            warn!(product = %product.name, error = %e, "Failed to insert product");
            continue;
        }
        if entry.is_some() {
            ledger_entries += 1;
        }
    }

    info!(
        products = PRODUCTS.len(),
        ledger_entries, "Products created"
    );

    for (idx, (name, phone, address, due)) in CUSTOMERS.iter().enumerate() {
        db.customers()
            .upsert(
                &store_id,
                &Customer {
                    id: format!("cust-{:03}", idx + 1),
                    name: name.to_string(),
                    phone: phone.to_string(),
                    address: address.to_string(),
                    email: None,
                    nid_card: None,
                    card_number: None,
                    total_due_cents: *due,
                },
            )
            .await?;
    }
    info!(count = CUSTOMERS.len(), "Customers created");
    info!("Seed complete");

    db.close().await;
    Ok(())
}
