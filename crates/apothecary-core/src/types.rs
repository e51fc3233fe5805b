//! # Domain Types
//!
//! Core domain types for the transaction lifecycle.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────┐              │
//! │  │     Transaction      │ owns   │      LineItem        │              │
//! │  │  ──────────────────  │───────►│  ──────────────────  │              │
//! │  │  id (UUID)           │  1..n  │  name, quantity      │              │
//! │  │  transaction_number  │        │  unit_price_cents    │              │
//! │  │  status / type       │        │  discount_cents      │              │
//! │  │  invoice_* fields    │        │  cost_price_cents    │              │
//! │  │  version             │        │  kind: ItemKind      │              │
//! │  └──────────────────────┘        └──────────┬───────────┘              │
//! │                                             │                          │
//! │                    ┌────────────────────────┴──────────────┐           │
//! │                    │ ItemKind (closed sum type)            │           │
//! │                    │ Product | FixedBlend | CustomBlend    │           │
//! │                    │ Bundle | Miscellaneous | Consultation │           │
//! │                    │ Service                               │           │
//! │                    └───────────────────────────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! - `id`: UUID v4, immutable, used for lookups and relations
//! - `transaction_number`: `TXN-YYYYMMDD-NNNN`, human-readable, never reused

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Transaction Status
// =============================================================================

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Editable, no stock moved, no invoice.
    #[default]
    Draft,
    /// Stock deducted, invoice produced (or pending).
    Completed,
    /// Stock reversed; record retained.
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Draft => "draft",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse transaction type kept alongside the status for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    #[default]
    Draft,
    Completed,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    /// Paid in full. Forces the transaction to `completed`.
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    EWallet,
    Insurance,
    Other,
}

// =============================================================================
// Invoice Status
// =============================================================================

/// Invoice generation progress: `none → pending → generating → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    None,
    Pending,
    Generating,
    Completed,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::None => "none",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Generating => "generating",
            InvoiceStatus::Completed => "completed",
            InvoiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Item Kinds
// =============================================================================

/// One ingredient of a custom blend, kept for display and duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BlendIngredient {
    pub product_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_cost_cents: Option<i64>,
}

/// Snapshot of one bundle component at the time the item was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BundleComponent {
    pub component_id: String,
    pub name: String,
    pub quantity: i64,
}

/// What a line item sells.
///
/// Each variant carries exactly the data its cost and stock strategy need:
///
/// | Kind          | Cost capture                         | Stock movement              |
/// |---------------|--------------------------------------|-----------------------------|
/// | Product       | catalog cost (composite if unknown)  | −qty on the product         |
/// | FixedBlend    | composite resolution                 | −qty × ingredient qty       |
/// | CustomBlend   | total ingredient cost ÷ qty          | none here                   |
/// | Bundle        | composite resolution                 | −qty on the bundle          |
/// | Miscellaneous | explicit only                        | none                        |
/// | Consultation  | explicit only                        | none                        |
/// | Service       | explicit only                        | none                        |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum ItemKind {
    Product {
        product_id: String,
    },
    FixedBlend {
        blend_id: String,
    },
    CustomBlend {
        total_ingredient_cost_cents: Option<i64>,
        #[serde(default)]
        ingredients: Vec<BlendIngredient>,
    },
    Bundle {
        bundle_id: String,
        #[serde(default)]
        components: Vec<BundleComponent>,
    },
    Miscellaneous,
    Consultation,
    Service,
}

impl ItemKind {
    /// The wire name of the variant (`product`, `fixed_blend`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            ItemKind::Product { .. } => "product",
            ItemKind::FixedBlend { .. } => "fixed_blend",
            ItemKind::CustomBlend { .. } => "custom_blend",
            ItemKind::Bundle { .. } => "bundle",
            ItemKind::Miscellaneous => "miscellaneous",
            ItemKind::Consultation => "consultation",
            ItemKind::Service => "service",
        }
    }

    /// The catalog entity this item references, if any.
    pub fn catalog_ref(&self) -> Option<&str> {
        match self {
            ItemKind::Product { product_id } => Some(product_id),
            ItemKind::FixedBlend { blend_id } => Some(blend_id),
            ItemKind::Bundle { bundle_id, .. } => Some(bundle_id),
            ItemKind::CustomBlend { .. }
            | ItemKind::Miscellaneous
            | ItemKind::Consultation
            | ItemKind::Service => None,
        }
    }
}

// =============================================================================
// Line Item
// =============================================================================

/// A line of a transaction. Owned by its transaction, no lifecycle of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
    /// Unit cost frozen at completion. Never recomputed afterwards.
    #[serde(default)]
    pub cost_price_cents: Option<i64>,
    pub kind: ItemKind,
}

impl LineItem {
    /// `unit_price × quantity`, before discounts.
    #[inline]
    pub fn gross(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    /// Line amount after the line discount.
    #[inline]
    pub fn net(&self) -> Money {
        self.gross() - self.discount()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// The central entity: a point-of-sale transaction document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Transaction {
    pub id: String,
    pub transaction_number: String,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    /// Stored as a JSON document column.
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub items: Vec<LineItem>,

    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,

    /// Bill-level discount.
    pub discount_cents: i64,
    pub total_cents: i64,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub paid_cents: i64,

    pub invoice_generated: bool,
    pub invoice_status: InvoiceStatus,
    pub invoice_number: Option<String>,
    pub invoice_path: Option<String>,
    pub invoice_error: Option<String>,

    pub refunded_cents: i64,
    pub refund_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub refunded_at: Option<DateTime<Utc>>,

    pub notes: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: DateTime<Utc>,
    /// Client-supplied autosave key. Unique per creator.
    pub draft_id: Option<String>,
    pub created_by: String,
    pub last_modified_by: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token for full-document saves.
    pub version: i64,
}

impl Transaction {
    /// Creates an empty draft shell with every invoice/refund field reset.
    pub fn new_draft(
        id: impl Into<String>,
        transaction_number: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id: id.into(),
            transaction_number: transaction_number.into(),
            status: TransactionStatus::Draft,
            transaction_type: TransactionType::Draft,
            items: Vec::new(),
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            customer_address: None,
            discount_cents: 0,
            total_cents: 0,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            paid_cents: 0,
            invoice_generated: false,
            invoice_status: InvoiceStatus::None,
            invoice_number: None,
            invoice_path: None,
            invoice_error: None,
            refunded_cents: 0,
            refund_reason: None,
            refunded_at: None,
            notes: None,
            transaction_date: now,
            draft_id: None,
            created_by: created_by.into(),
            last_modified_by: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[inline]
    pub fn bill_discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    /// Clears every invoice field so the next completion renders a fresh invoice.
    pub fn clear_invoice(&mut self) {
        self.invoice_generated = false;
        self.invoice_status = InvoiceStatus::None;
        self.invoice_number = None;
        self.invoice_path = None;
        self.invoice_error = None;
    }

    /// Clears refund bookkeeping.
    pub fn clear_refund(&mut self) {
        self.refunded_cents = 0;
        self.refund_reason = None;
        self.refunded_at = None;
    }

    /// Name printed on the invoice and used in its file name.
    pub fn customer_display_name(&self) -> &str {
        self.customer_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Walk-in")
    }
}

// =============================================================================
// Inventory Movements
// =============================================================================

/// What a stock movement adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StockItemKind {
    Product,
    Bundle,
}

impl StockItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockItemKind::Product => "product",
            StockItemKind::Bundle => "bundle",
        }
    }
}

/// One signed stock adjustment tied to a transaction number.
///
/// Compensating entries point at the movement they undo via `reversal_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryMovement {
    pub id: String,
    pub transaction_number: String,
    pub item_kind: StockItemKind,
    pub item_id: String,
    pub quantity_delta: i64,
    pub reversal_of: Option<String>,
    pub actor_id: String,
    pub note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Actors
// =============================================================================

/// Role of the staff member performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Staff,
    Manager,
    Admin,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Actor {
            id: id.into(),
            role,
        }
    }

    /// An actor with an empty id carries no identity.
    pub fn is_authenticated(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product_line(qty: i64, price: i64, discount: i64) -> LineItem {
        LineItem {
            name: "Ginger root".to_string(),
            quantity: qty,
            unit_price_cents: price,
            discount_cents: discount,
            cost_price_cents: None,
            kind: ItemKind::Product {
                product_id: "p-1".to_string(),
            },
        }
    }

    #[test]
    fn test_line_item_amounts() {
        let item = product_line(2, 1000, 150);
        assert_eq!(item.gross().cents(), 2000);
        assert_eq!(item.net().cents(), 1850);
    }

    #[test]
    fn test_item_kind_wire_format() {
        let item = product_line(1, 500, 0);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"]["item_type"], "product");
        assert_eq!(json["kind"]["product_id"], "p-1");

        let service: ItemKind = serde_json::from_str(r#"{"item_type":"service"}"#).unwrap();
        assert_eq!(service, ItemKind::Service);

        let bundle: ItemKind =
            serde_json::from_str(r#"{"item_type":"bundle","bundle_id":"b-1"}"#).unwrap();
        assert_eq!(bundle.catalog_ref(), Some("b-1"));
        assert_eq!(bundle.type_name(), "bundle");
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransactionType::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(serde_json::to_string(&InvoiceStatus::None).unwrap(), "\"none\"");
        assert_eq!(TransactionStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_new_draft_is_clean() {
        let txn = Transaction::new_draft("id-1", "TXN-20260101-0001", "user-1", Utc::now());
        assert_eq!(txn.status, TransactionStatus::Draft);
        assert_eq!(txn.invoice_status, InvoiceStatus::None);
        assert!(!txn.invoice_generated);
        assert_eq!(txn.customer_display_name(), "Walk-in");
    }

    #[test]
    fn test_actor_authentication() {
        assert!(Actor::new("u-1", Role::Staff).is_authenticated());
        assert!(!Actor::new("  ", Role::Admin).is_authenticated());
    }
}
