//! # Pricing
//!
//! Canonical invoice totals.
//!
//! ```text
//! subtotal       = Σ(unit_price × quantity)
//! item_discounts = Σ(line discount)
//! total          = subtotal − item_discounts − bill_discount
//! ```
//!
//! The stored `total_cents` of a transaction must always equal `total`.
//! Every invoice touch-point recomputes it and corrects drift.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{LineItem, Transaction};

/// Breakdown printed on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub item_discounts: Money,
    pub bill_discount: Money,
    pub total: Money,
}

/// Computes totals for a set of lines and a bill-level discount.
///
/// ```rust
/// use apothecary_core::pricing::compute_totals;
/// use apothecary_core::{ItemKind, LineItem, Money};
///
/// let items = vec![
///     LineItem { name: "A".into(), quantity: 2, unit_price_cents: 1000,
///                discount_cents: 0, cost_price_cents: None, kind: ItemKind::Service },
///     LineItem { name: "B".into(), quantity: 1, unit_price_cents: 500,
///                discount_cents: 0, cost_price_cents: None, kind: ItemKind::Service },
/// ];
/// let totals = compute_totals(&items, Money::from_cents(200));
/// assert_eq!(totals.total.cents(), 2300);
/// ```
pub fn compute_totals(items: &[LineItem], bill_discount: Money) -> InvoiceTotals {
    let subtotal: Money = items.iter().map(LineItem::gross).sum();
    let item_discounts: Money = items.iter().map(LineItem::discount).sum();

    InvoiceTotals {
        subtotal,
        item_discounts,
        bill_discount,
        total: subtotal - item_discounts - bill_discount,
    }
}

/// Totals for a stored transaction.
pub fn transaction_totals(txn: &Transaction) -> InvoiceTotals {
    compute_totals(&txn.items, txn.bill_discount())
}

/// Returns the corrected total when the stored one has drifted.
pub fn total_drift(txn: &Transaction) -> Option<Money> {
    let canonical = transaction_totals(txn).total;
    (canonical.cents() != txn.total_cents).then_some(canonical)
}
