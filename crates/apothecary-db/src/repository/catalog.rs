//! # Catalog Repository
//!
//! Products and composites (bundles, fixed blends) as seen by cost capture
//! and inventory reconciliation. Catalog CRUD beyond that is handled
//! elsewhere; this repository only reads costs and adjusts stock.
//!
//! ## Composite Structure
//! ```text
//! Composite "Sleep Bundle" (bundle)
//! ├── product  "Chamomile"        × 2
//! ├── product  "Valerian root"    × 1
//! └── composite "Calm Blend"      × 1   ◄─ nesting resolved recursively
//!     ├── product "Lavender"      × 3
//!     └── product "Lemon balm"    × 1
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::error::DbResult;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    /// Unit cost, if known.
    pub cost_cents: Option<i64>,
    pub current_stock: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
    /// Sold and stocked as a unit.
    Bundle,
    /// A pre-made blend whose ingredients are stocked individually.
    FixedBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Product,
    Composite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompositeComponent {
    pub component_kind: ComponentKind,
    pub component_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Composite {
    pub id: String,
    pub kind: CompositeKind,
    pub name: String,
    pub price_cents: i64,
    pub current_stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub components: Vec<CompositeComponent>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for catalog reads and stock adjustments.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    pub async fn insert_product(&self, conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price_cents, cost_cents, current_stock,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.cost_cents)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a composite and its component list.
    pub async fn insert_composite(
        &self,
        conn: &mut SqliteConnection,
        composite: &Composite,
    ) -> DbResult<()> {
        debug!(
            id = %composite.id,
            components = composite.components.len(),
            "Inserting composite"
        );

        sqlx::query(
            r#"
            INSERT INTO composites (
                id, kind, name, price_cents, current_stock, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&composite.id)
        .bind(composite.kind)
        .bind(&composite.name)
        .bind(composite.price_cents)
        .bind(composite.current_stock)
        .bind(composite.created_at)
        .bind(composite.updated_at)
        .execute(&mut *conn)
        .await?;

        for component in &composite.components {
            sqlx::query(
                r#"
                INSERT INTO composite_components (
                    composite_id, component_kind, component_id, quantity
                ) VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&composite.id)
            .bind(component.component_kind)
            .bind(&component.component_id)
            .bind(component.quantity)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Adds `delta` to a product's stock. Returns the new level, `None` if
    /// the product doesn't exist. Stock may go negative.
    pub async fn adjust_product_stock(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> DbResult<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET current_stock = current_stock + ?2, updated_at = ?3
            WHERE id = ?1
            RETURNING current_stock
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(stock)
    }

    /// Adds `delta` to a composite's own stock level.
    pub async fn adjust_composite_stock(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> DbResult<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE composites
            SET current_stock = current_stock + ?2, updated_at = ?3
            WHERE id = ?1
            RETURNING current_stock
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(stock)
    }

    // -------------------------------------------------------------------------
    // Reads (unit of work)
    // -------------------------------------------------------------------------

    /// Batch lookup of product costs in one query.
    ///
    /// Ids missing from the result are not products. A present id with a
    /// `None` cost is a product whose cost is unknown.
    pub async fn find_product_costs(
        &self,
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> DbResult<HashMap<String, Option<i64>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT id, cost_cents FROM products WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, Option<i64>)> =
            builder.build_query_as().fetch_all(&mut *conn).await?;

        debug!(requested = ids.len(), found = rows.len(), "Batch product cost lookup");
        Ok(rows.into_iter().collect())
    }

    pub async fn find_product(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(product)
    }

    /// Loads a composite with its component list.
    pub async fn find_composite(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Composite>> {
        let composite = sqlx::query_as::<_, Composite>("SELECT * FROM composites WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(mut composite) = composite else {
            return Ok(None);
        };

        composite.components = sqlx::query_as::<_, CompositeComponent>(
            r#"
            SELECT component_kind, component_id, quantity
            FROM composite_components
            WHERE composite_id = ?1
            ORDER BY component_kind, component_id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(composite))
    }

    // -------------------------------------------------------------------------
    // Reads (pool)
    // -------------------------------------------------------------------------

    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        self.find_product(&mut conn, id).await
    }

    pub async fn get_composite(&self, id: &str) -> DbResult<Option<Composite>> {
        let mut conn = self.pool.acquire().await?;
        self.find_composite(&mut conn, id).await
    }

    pub async fn count_products(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
