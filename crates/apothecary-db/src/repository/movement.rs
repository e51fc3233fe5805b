//! # Inventory Movement Repository
//!
//! Append-only log of stock adjustments keyed by transaction number.
//!
//! ## Compensation
//! ```text
//! id=m1  TXN-…-0001  product p1  −2                 (deduction)
//! id=m2  TXN-…-0001  bundle  b1  −1                 (deduction)
//! id=m3  TXN-…-0001  product p1  +2  reversal_of=m1 (compensation)
//! id=m4  TXN-…-0001  bundle  b1  +1  reversal_of=m2 (compensation)
//!                                ──
//!                      net       0
//! ```
//! `reversal_of` is UNIQUE: a movement can be compensated at most once.
//! Movements are never deleted, not even with their transaction.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use apothecary_core::InventoryMovement;

/// Repository for inventory movements.
#[derive(Debug, Clone)]
pub struct InventoryMovementRepository {
    pool: SqlitePool,
}

impl InventoryMovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryMovementRepository { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        movement: &InventoryMovement,
    ) -> DbResult<()> {
        debug!(
            transaction_number = %movement.transaction_number,
            item_id = %movement.item_id,
            delta = movement.quantity_delta,
            "Recording inventory movement"
        );

        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, transaction_number, item_kind, item_id, quantity_delta,
                reversal_of, actor_id, note, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.transaction_number)
        .bind(movement.item_kind)
        .bind(&movement.item_id)
        .bind(movement.quantity_delta)
        .bind(&movement.reversal_of)
        .bind(&movement.actor_id)
        .bind(&movement.note)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Original (non-compensating) movements of a transaction.
    pub async fn find_originals(
        &self,
        conn: &mut SqliteConnection,
        transaction_number: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            r#"
            SELECT * FROM inventory_movements
            WHERE transaction_number = ?1 AND reversal_of IS NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(transaction_number)
        .fetch_all(&mut *conn)
        .await?;

        Ok(movements)
    }

    /// Ids of the original movements that already have a compensating entry.
    pub async fn find_reversed_ids(
        &self,
        conn: &mut SqliteConnection,
        transaction_number: &str,
    ) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT reversal_of FROM inventory_movements
            WHERE transaction_number = ?1 AND reversal_of IS NOT NULL
            "#,
        )
        .bind(transaction_number)
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }

    // -------------------------------------------------------------------------
    // Reads (pool)
    // -------------------------------------------------------------------------

    /// Every movement of a transaction, oldest first.
    pub async fn list_for_transaction(
        &self,
        transaction_number: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            r#"
            SELECT * FROM inventory_movements
            WHERE transaction_number = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(transaction_number)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Sum of all deltas for a transaction. Zero once fully reversed.
    pub async fn net_quantity(&self, transaction_number: &str) -> DbResult<i64> {
        let net: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity_delta), 0)
            FROM inventory_movements
            WHERE transaction_number = ?1
            "#,
        )
        .bind(transaction_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(net)
    }

    pub async fn count_for_transaction(&self, transaction_number: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inventory_movements WHERE transaction_number = ?1",
        )
        .bind(transaction_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
