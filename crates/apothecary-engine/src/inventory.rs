//! # Inventory Reconciliation
//!
//! Applies and reverses the stock movements tied to a transaction number.
//!
//! ## Deduction Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Product      −qty on the product (a composite id falls back to the     │
//! │               composite's own stock)                                    │
//! │  FixedBlend   −qty × component qty on every ingredient                  │
//! │  Bundle       −qty on the bundle itself                                 │
//! │  CustomBlend  nothing here, ingredients are drawn down elsewhere        │
//! │  Misc / Consultation / Service   nothing                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock may go negative. Shortfalls and unknown references are collected
//! as report entries; only storage failures are returned as `Err`, so the
//! caller decides whether a failure is fatal.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use apothecary_core::{InventoryMovement, ItemKind, StockItemKind, Transaction};
use apothecary_db::{
    CatalogRepository, ComponentKind, DbError, DbResult, InventoryMovementRepository,
};

/// Result of a deduction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InventoryReport {
    pub movements: Vec<InventoryMovement>,
    pub errors: Vec<String>,
}

/// Result of a reversal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReversalReport {
    pub reversed_count: usize,
    pub original_movement_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ReversalReport {
    /// True when every original movement is now compensated.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InventoryEngine {
    catalog: CatalogRepository,
    movements: InventoryMovementRepository,
}

impl InventoryEngine {
    pub fn new(catalog: CatalogRepository, movements: InventoryMovementRepository) -> Self {
        InventoryEngine { catalog, movements }
    }

    // =========================================================================
    // Deduction
    // =========================================================================

    /// Deducts stock for every eligible line of `txn`.
    pub async fn process_inventory(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
        actor_id: &str,
    ) -> DbResult<InventoryReport> {
        let mut report = InventoryReport::default();

        for item in &txn.items {
            match &item.kind {
                ItemKind::Product { product_id } => {
                    let applied = self
                        .deduct(
                            &mut *conn,
                            txn,
                            actor_id,
                            StockItemKind::Product,
                            product_id,
                            item.quantity,
                            &item.name,
                            &mut report,
                        )
                        .await?;
                    if !applied {
                        self.deduct_or_report(
                            &mut *conn,
                            txn,
                            actor_id,
                            StockItemKind::Bundle,
                            product_id,
                            item.quantity,
                            &item.name,
                            &mut report,
                        )
                        .await?;
                    }
                }
                ItemKind::Bundle { bundle_id, .. } => {
                    self.deduct_or_report(
                        &mut *conn,
                        txn,
                        actor_id,
                        StockItemKind::Bundle,
                        bundle_id,
                        item.quantity,
                        &item.name,
                        &mut report,
                    )
                    .await?;
                }
                ItemKind::FixedBlend { blend_id } => {
                    let Some(blend) = self.catalog.find_composite(&mut *conn, blend_id).await? else {
                        report
                            .errors
                            .push(format!("Blend '{}' ({}) not found in catalog", item.name, blend_id));
                        continue;
                    };
                    for component in &blend.components {
                        let kind = match component.component_kind {
                            ComponentKind::Product => StockItemKind::Product,
                            ComponentKind::Composite => StockItemKind::Bundle,
                        };
                        self.deduct_or_report(
                            &mut *conn,
                            txn,
                            actor_id,
                            kind,
                            &component.component_id,
                            item.quantity * component.quantity,
                            &item.name,
                            &mut report,
                        )
                        .await?;
                    }
                }
                ItemKind::CustomBlend { .. }
                | ItemKind::Miscellaneous
                | ItemKind::Consultation
                | ItemKind::Service => {}
            }
        }

        info!(
            transaction_number = %txn.transaction_number,
            movements = report.movements.len(),
            errors = report.errors.len(),
            "Inventory deducted"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn deduct_or_report(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
        actor_id: &str,
        kind: StockItemKind,
        id: &str,
        quantity: i64,
        item_name: &str,
        report: &mut InventoryReport,
    ) -> DbResult<()> {
        let applied = self
            .deduct(conn, txn, actor_id, kind, id, quantity, item_name, report)
            .await?;
        if !applied {
            report
                .errors
                .push(format!("'{}': {} {} not found in catalog", item_name, kind.as_str(), id));
        }
        Ok(())
    }

    /// Applies one deduction and records its movement. False if `id` is unknown.
    #[allow(clippy::too_many_arguments)]
    async fn deduct(
        &self,
        conn: &mut SqliteConnection,
        txn: &Transaction,
        actor_id: &str,
        kind: StockItemKind,
        id: &str,
        quantity: i64,
        item_name: &str,
        report: &mut InventoryReport,
    ) -> DbResult<bool> {
        let Some(stock) = self.adjust(&mut *conn, kind, id, -quantity).await? else {
            return Ok(false);
        };

        if stock < 0 {
            report.errors.push(format!(
                "Insufficient stock for '{}': {} available, {} sold",
                item_name,
                stock + quantity,
                quantity
            ));
        }

        let movement = InventoryMovement {
            id: Uuid::new_v4().to_string(),
            transaction_number: txn.transaction_number.clone(),
            item_kind: kind,
            item_id: id.to_string(),
            quantity_delta: -quantity,
            reversal_of: None,
            actor_id: actor_id.to_string(),
            note: Some(item_name.to_string()),
            created_at: Utc::now(),
        };
        self.movements.insert(&mut *conn, &movement).await?;
        report.movements.push(movement);
        Ok(true)
    }

    async fn adjust(
        &self,
        conn: &mut SqliteConnection,
        kind: StockItemKind,
        id: &str,
        delta: i64,
    ) -> DbResult<Option<i64>> {
        match kind {
            StockItemKind::Product => self.catalog.adjust_product_stock(conn, id, delta).await,
            StockItemKind::Bundle => self.catalog.adjust_composite_stock(conn, id, delta).await,
        }
    }

    // =========================================================================
    // Reversal
    // =========================================================================

    /// Writes a compensating movement for every original movement of
    /// `transaction_number` that has not been compensated yet.
    pub async fn reverse_inventory(
        &self,
        conn: &mut SqliteConnection,
        transaction_number: &str,
        actor_id: &str,
    ) -> DbResult<ReversalReport> {
        let originals = self.movements.find_originals(&mut *conn, transaction_number).await?;
        let already_reversed = self
            .movements
            .find_reversed_ids(&mut *conn, transaction_number)
            .await?;

        let mut report = ReversalReport {
            original_movement_count: originals.len(),
            ..ReversalReport::default()
        };

        if originals.is_empty() {
            report
                .warnings
                .push(format!("No inventory movements recorded for {}", transaction_number));
            return Ok(report);
        }

        for original in &originals {
            if already_reversed.contains(&original.id) {
                report
                    .warnings
                    .push(format!("Movement {} was already reversed", original.id));
                continue;
            }

            let delta = -original.quantity_delta;
            let Some(stock) = self
                .adjust(&mut *conn, original.item_kind, &original.item_id, delta)
                .await?
            else {
                // No movement recorded, so a later reversal can retry.
                report.errors.push(format!(
                    "{} {} no longer exists, stock not restored",
                    original.item_kind.as_str(),
                    original.item_id
                ));
                continue;
            };

            let compensation = InventoryMovement {
                id: Uuid::new_v4().to_string(),
                transaction_number: transaction_number.to_string(),
                item_kind: original.item_kind,
                item_id: original.item_id.clone(),
                quantity_delta: delta,
                reversal_of: Some(original.id.clone()),
                actor_id: actor_id.to_string(),
                note: original.note.clone(),
                created_at: Utc::now(),
            };

            match self.movements.insert(&mut *conn, &compensation).await {
                Ok(()) => {
                    debug!(item_id = %original.item_id, stock = stock, "Stock restored");
                    report.reversed_count += 1;
                }
                Err(DbError::UniqueViolation { .. }) => {
                    // Another reversal claimed this movement first.
                    self.adjust(&mut *conn, original.item_kind, &original.item_id, -delta)
                        .await?;
                    report
                        .warnings
                        .push(format!("Movement {} was already reversed", original.id));
                }
                Err(e) => return Err(e),
            }
        }

        if report.reversed_count < report.original_movement_count {
            warn!(
                transaction_number = %transaction_number,
                reversed = report.reversed_count,
                original = report.original_movement_count,
                "Partial inventory reversal"
            );
        } else {
            info!(
                transaction_number = %transaction_number,
                reversed = report.reversed_count,
                "Inventory reversed"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{composite, line, product};
    use apothecary_core::TransactionStatus;
    use apothecary_db::{CompositeKind, Database, DbConfig};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();
        let mut conn = db.pool().acquire().await.unwrap();

        catalog.insert_product(&mut conn, &product("p1", Some(300), 10)).await.unwrap();
        catalog.insert_product(&mut conn, &product("p2", Some(400), 1)).await.unwrap();
        catalog
            .insert_composite(
                &mut conn,
                &composite("b1", CompositeKind::Bundle, &[("p1", 1), ("p2", 1)], &[]),
            )
            .await
            .unwrap();
        catalog
            .insert_composite(
                &mut conn,
                &composite("calm", CompositeKind::FixedBlend, &[("p1", 2), ("p2", 1)], &[]),
            )
            .await
            .unwrap();
        db
    }

    fn sale(items: Vec<apothecary_core::LineItem>) -> Transaction {
        let mut txn = Transaction::new_draft("t1", "TXN-20260314-0001", "user-1", Utc::now());
        txn.status = TransactionStatus::Completed;
        txn.items = items;
        txn
    }

    async fn stock(db: &Database, id: &str) -> i64 {
        match db.catalog().get_product(id).await.unwrap() {
            Some(p) => p.current_stock,
            None => db.catalog().get_composite(id).await.unwrap().unwrap().current_stock,
        }
    }

    #[tokio::test]
    async fn test_deduction_per_item_kind() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());

        let txn = sale(vec![
            line("Chamomile", 2, 650, ItemKind::Product { product_id: "p1".into() }),
            line("Sleep bundle", 1, 1990, ItemKind::Bundle { bundle_id: "b1".into(), components: vec![] }),
            line("Calm blend", 1, 1450, ItemKind::FixedBlend { blend_id: "calm".into() }),
            line("Consultation", 1, 4000, ItemKind::Consultation),
        ]);

        let report = {
            let mut uow = db.begin().await.unwrap();
            let report = engine.process_inventory(&mut uow, &txn, "user-1").await.unwrap();
            uow.commit().await.unwrap();
            report
        };

        // p1 ×2, b1 ×1, calm → p1 ×2 and p2 ×1
        assert_eq!(report.movements.len(), 4);
        assert_eq!(stock(&db, "p1").await, 6);
        assert_eq!(stock(&db, "b1").await, 4);
        assert_eq!(stock(&db, "p2").await, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_shortfall_is_reported_not_blocking() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());
        let txn = sale(vec![line("Valerian", 3, 890, ItemKind::Product { product_id: "p2".into() })]);

        let report = {
            let mut uow = db.begin().await.unwrap();
            let report = engine.process_inventory(&mut uow, &txn, "user-1").await.unwrap();
            uow.commit().await.unwrap();
            report
        };

        assert_eq!(report.movements.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Insufficient stock"));
        assert_eq!(stock(&db, "p2").await, -2);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_reported() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());
        let txn = sale(vec![line("Ghost", 1, 100, ItemKind::Product { product_id: "nope".into() })]);

        let mut uow = db.begin().await.unwrap();
        let report = engine.process_inventory(&mut uow, &txn, "user-1").await.unwrap();

        assert!(report.movements.is_empty());
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_reversal_nets_to_zero_and_is_idempotent() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());
        let txn = sale(vec![
            line("Chamomile", 2, 650, ItemKind::Product { product_id: "p1".into() }),
            line("Calm blend", 1, 1450, ItemKind::FixedBlend { blend_id: "calm".into() }),
        ]);

        {
            let mut uow = db.begin().await.unwrap();
            engine.process_inventory(&mut uow, &txn, "user-1").await.unwrap();
            uow.commit().await.unwrap();
        }

        let first = {
            let mut uow = db.begin().await.unwrap();
            let report = engine
                .reverse_inventory(&mut uow, &txn.transaction_number, "user-2")
                .await
                .unwrap();
            uow.commit().await.unwrap();
            report
        };
        assert_eq!(first.original_movement_count, 3);
        assert_eq!(first.reversed_count, 3);
        assert!(first.is_complete());

        let second = {
            let mut uow = db.begin().await.unwrap();
            let report = engine
                .reverse_inventory(&mut uow, &txn.transaction_number, "user-2")
                .await
                .unwrap();
            uow.commit().await.unwrap();
            report
        };
        assert_eq!(second.reversed_count, 0);
        assert_eq!(second.warnings.len(), 3);

        let movements = db.movements();
        assert_eq!(movements.net_quantity(&txn.transaction_number).await.unwrap(), 0);
        assert_eq!(stock(&db, "p1").await, 10);
        assert_eq!(stock(&db, "p2").await, 1);
    }

    #[tokio::test]
    async fn test_reversal_of_missing_item_can_be_retried() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());
        let txn = sale(vec![line("Chamomile", 2, 650, ItemKind::Product { product_id: "p1".into() })]);

        {
            let mut uow = db.begin().await.unwrap();
            engine.process_inventory(&mut uow, &txn, "user-1").await.unwrap();
            uow.commit().await.unwrap();
        }
        sqlx::query("DELETE FROM products WHERE id = 'p1'")
            .execute(db.pool())
            .await
            .unwrap();

        let missing = {
            let mut uow = db.begin().await.unwrap();
            let report = engine
                .reverse_inventory(&mut uow, &txn.transaction_number, "user-2")
                .await
                .unwrap();
            uow.commit().await.unwrap();
            report
        };
        assert_eq!(missing.reversed_count, 0);
        assert_eq!(missing.errors.len(), 1);
        assert!(!missing.is_complete());
        assert_eq!(
            db.movements().count_for_transaction(&txn.transaction_number).await.unwrap(),
            1
        );

        // The product comes back: the same movement is still reversible.
        let mut conn = db.pool().acquire().await.unwrap();
        db.catalog()
            .insert_product(&mut conn, &product("p1", Some(300), 8))
            .await
            .unwrap();
        drop(conn);

        let retried = {
            let mut uow = db.begin().await.unwrap();
            let report = engine
                .reverse_inventory(&mut uow, &txn.transaction_number, "user-2")
                .await
                .unwrap();
            uow.commit().await.unwrap();
            report
        };
        assert_eq!(retried.reversed_count, 1);
        assert!(retried.is_complete());
        assert_eq!(stock(&db, "p1").await, 10);
        assert_eq!(db.movements().net_quantity(&txn.transaction_number).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reversal_without_movements_warns() {
        let db = setup().await;
        let engine = InventoryEngine::new(db.catalog(), db.movements());

        let mut uow = db.begin().await.unwrap();
        let report = engine
            .reverse_inventory(&mut uow, "TXN-20260314-0099", "user-1")
            .await
            .unwrap();

        assert_eq!(report.original_movement_count, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
