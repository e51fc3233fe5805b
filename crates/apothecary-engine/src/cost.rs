//! # Cost Capture
//!
//! Freezes a unit cost into every line at completion time so margin reports
//! stay correct after catalog costs change.
//!
//! ## Resolution Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. explicit cost_price on the line        → kept as is                 │
//! │  2. custom blend                           → ingredient cost ÷ qty      │
//! │  3. catalog refs, ONE batch product lookup → product.cost               │
//! │  4. ids that are not products              → composite, recursively:    │
//! │        Σ component cost × component qty                                 │
//! │        product components: batch result, else point lookup              │
//! │        composite components: recurse (depth ≤ MAX_COMPOSITE_DEPTH)      │
//! │  5. anything still unknown                 → 0, never an error          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Runs on the caller's connection so it joins the creation unit of work.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use apothecary_core::{ItemKind, LineItem, Money, MAX_COMPOSITE_DEPTH};
use apothecary_db::{CatalogRepository, ComponentKind, DbResult};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a capture pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostCaptureReport {
    /// Lines that received a cost in this pass.
    pub captured: usize,
    /// Lines that already carried an explicit cost.
    pub kept: usize,
    /// Catalog ids whose cost could not be determined and counted as zero.
    pub unresolved: Vec<String>,
}

/// Memo shared across one capture pass.
#[derive(Debug, Default)]
struct Resolution {
    products: HashMap<String, i64>,
    composites: HashMap<String, i64>,
    visiting: HashSet<String>,
    unresolved: Vec<String>,
}

impl Resolution {
    fn unresolved(&mut self, id: &str) {
        if !self.unresolved.iter().any(|u| u == id) {
            self.unresolved.push(id.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostCaptureResolver {
    catalog: CatalogRepository,
}

impl CostCaptureResolver {
    pub fn new(catalog: CatalogRepository) -> Self {
        CostCaptureResolver { catalog }
    }

    /// Fills `cost_price_cents` on every line that lacks one.
    pub async fn capture(
        &self,
        conn: &mut SqliteConnection,
        items: &mut [LineItem],
    ) -> DbResult<CostCaptureReport> {
        let mut report = CostCaptureReport::default();
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (index, item) in items.iter_mut().enumerate() {
            if item.cost_price_cents.is_some() {
                report.kept += 1;
                continue;
            }

            match &item.kind {
                ItemKind::CustomBlend {
                    total_ingredient_cost_cents,
                    ingredients,
                } => {
                    let total = match total_ingredient_cost_cents {
                        Some(cents) => Money::from_cents(*cents),
                        None => ingredients
                            .iter()
                            .map(|i| Money::from_cents(i.unit_cost_cents.unwrap_or(0)).multiply_quantity(i.quantity))
                            .sum(),
                    };
                    item.cost_price_cents = Some(total.per_unit(item.quantity).cents());
                    report.captured += 1;
                }
                ItemKind::Product { product_id: id }
                | ItemKind::FixedBlend { blend_id: id }
                | ItemKind::Bundle { bundle_id: id, .. } => {
                    pending.push((index, id.clone()));
                }
                ItemKind::Miscellaneous | ItemKind::Consultation | ItemKind::Service => {
                    item.cost_price_cents = Some(0);
                    report.captured += 1;
                }
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let mut ids: Vec<String> = pending.iter().map(|(_, id)| id.clone()).collect();
        ids.sort();
        ids.dedup();

        let mut state = Resolution::default();
        let costs = self.catalog.find_product_costs(&mut *conn, &ids).await?;
        for (id, cost) in &costs {
            if cost.is_none() {
                state.unresolved(id);
            }
            state.products.insert(id.clone(), cost.unwrap_or(0));
        }

        for id in ids.iter().filter(|id| !costs.contains_key(*id)) {
            self.resolve_composite(&mut *conn, id, 1, &mut state).await?;
        }

        for (index, id) in pending {
            let cost = state
                .products
                .get(&id)
                .or_else(|| state.composites.get(&id))
                .copied()
                .unwrap_or(0);
            items[index].cost_price_cents = Some(cost);
            report.captured += 1;
        }

        report.unresolved = state.unresolved;
        debug!(
            captured = report.captured,
            kept = report.kept,
            unresolved = report.unresolved.len(),
            "Costs captured"
        );
        Ok(report)
    }

    /// Unit cost of a composite: Σ component cost × component quantity.
    fn resolve_composite<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        id: &'a str,
        depth: usize,
        state: &'a mut Resolution,
    ) -> BoxFuture<'a, DbResult<i64>> {
        Box::pin(async move {
            if let Some(cost) = state.composites.get(id) {
                return Ok(*cost);
            }
            if depth > MAX_COMPOSITE_DEPTH {
                warn!(id = %id, depth = depth, "Composite nesting too deep, cost counted as zero");
                state.unresolved(id);
                return Ok(0);
            }
            if !state.visiting.insert(id.to_string()) {
                warn!(id = %id, "Composite cycle detected, cost counted as zero");
                state.unresolved(id);
                return Ok(0);
            }

            let Some(composite) = self.catalog.find_composite(&mut *conn, id).await? else {
                debug!(id = %id, "Catalog reference not found, cost counted as zero");
                state.visiting.remove(id);
                state.unresolved(id);
                return Ok(0);
            };

            let mut total = Money::zero();
            for component in &composite.components {
                let unit = match component.component_kind {
                    ComponentKind::Product => {
                        self.product_cost(&mut *conn, &component.component_id, state).await?
                    }
                    ComponentKind::Composite => {
                        self.resolve_composite(&mut *conn, &component.component_id, depth + 1, state)
                            .await?
                    }
                };
                total += Money::from_cents(unit).multiply_quantity(component.quantity);
            }

            state.visiting.remove(id);
            state.composites.insert(id.to_string(), total.cents());
            Ok(total.cents())
        })
    }

    /// Product cost from the memo, else a point lookup.
    async fn product_cost(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        state: &mut Resolution,
    ) -> DbResult<i64> {
        if let Some(cost) = state.products.get(id) {
            return Ok(*cost);
        }

        let cost = match self.catalog.find_product(&mut *conn, id).await? {
            Some(product) => {
                if product.cost_cents.is_none() {
                    state.unresolved(id);
                }
                product.cost_cents.unwrap_or(0)
            }
            None => {
                state.unresolved(id);
                0
            }
        };
        state.products.insert(id.to_string(), cost);
        Ok(cost)
    }
}
