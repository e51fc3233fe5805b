//! # Seed Data Generator
//!
//! Populates the database with a small apothecary catalog for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./apothecary_dev.db
//! cargo run -p apothecary-db --bin seed
//!
//! # Specify database path
//! cargo run -p apothecary-db --bin seed -- --db ./data/apothecary.db
//! ```
//!
//! ## Generated Catalog
//! - Loose herbs and oils with known unit costs
//! - Bundles (stocked as a unit) built from those products
//! - Fixed blends (ingredients stocked individually)

use chrono::Utc;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use apothecary_db::{
    ComponentKind, Composite, CompositeComponent, CompositeKind, Database, DbConfig, Product,
};

/// (sku, name, price, cost, stock)
const PRODUCTS: &[(&str, &str, i64, i64, i64)] = &[
    ("HRB-CHAM", "Chamomile flowers 50g", 650, 300, 40),
    ("HRB-VALR", "Valerian root 50g", 890, 400, 25),
    ("HRB-LAVD", "Lavender buds 50g", 720, 310, 30),
    ("HRB-LMBL", "Lemon balm 50g", 680, 280, 30),
    ("HRB-PEPM", "Peppermint leaf 50g", 590, 220, 60),
    ("HRB-GING", "Ginger root 100g", 540, 200, 50),
    ("OIL-EUCL", "Eucalyptus oil 10ml", 1190, 520, 20),
    ("OIL-TTRE", "Tea tree oil 10ml", 1290, 560, 18),
    ("ACC-JAR", "Amber glass jar", 250, 90, 200),
];

/// (name, kind, price, [(sku, qty)])
const COMPOSITES: &[(&str, CompositeKind, i64, &[(&str, i64)])] = &[
    (
        "Sleep Support Bundle",
        CompositeKind::Bundle,
        1990,
        &[("HRB-CHAM", 1), ("HRB-VALR", 1), ("ACC-JAR", 1)],
    ),
    (
        "Calm Blend",
        CompositeKind::FixedBlend,
        1450,
        &[("HRB-LAVD", 1), ("HRB-LMBL", 1)],
    ),
    (
        "Digestive Blend",
        CompositeKind::FixedBlend,
        1150,
        &[("HRB-PEPM", 1), ("HRB-GING", 1)],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./apothecary_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Apothecary Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./apothecary_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    let catalog = db.catalog();
    let existing = catalog.count_products().await?;
    if existing > 0 {
        warn!(existing = existing, "Catalog already seeded, skipping");
        return Ok(());
    }

    let now = Utc::now();
    let mut uow = db.begin().await?;
    let mut ids = std::collections::HashMap::new();

    for (sku, name, price, cost, stock) in PRODUCTS {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: sku.to_string(),
            name: name.to_string(),
            price_cents: *price,
            cost_cents: Some(*cost),
            current_stock: *stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        catalog.insert_product(&mut uow, &product).await?;
        ids.insert(*sku, product.id);
    }

    for (name, kind, price, components) in COMPOSITES {
        let components = components
            .iter()
            .filter_map(|(sku, qty)| {
                ids.get(sku).map(|id| CompositeComponent {
                    component_kind: ComponentKind::Product,
                    component_id: id.clone(),
                    quantity: *qty,
                })
            })
            .collect();

        let composite = Composite {
            id: Uuid::new_v4().to_string(),
            kind: *kind,
            name: name.to_string(),
            price_cents: *price,
            current_stock: if *kind == CompositeKind::Bundle { 10 } else { 0 },
            created_at: now,
            updated_at: now,
            components,
        };
        catalog.insert_composite(&mut uow, &composite).await?;
    }

    uow.commit().await?;

    info!(
        products = PRODUCTS.len(),
        composites = COMPOSITES.len(),
        "Catalog seeded"
    );
    Ok(())
}
