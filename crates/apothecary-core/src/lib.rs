//! # apothecary-core: Pure Business Logic for the Back Office
//!
//! Transaction documents, line items, money math and lifecycle rules as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Apothecary Back-Office Architecture                 │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               apothecary-engine (orchestration)                 │   │
//! │  │  TransactionService, cost capture, inventory, invoice pipeline  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ apothecary-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ │   │
//! │  │  │  types  │ │  money  │ │ pricing  │ │lifecycle │ │ invoice │ │   │
//! │  │  │LineItem │ │  Money  │ │  totals  │ │  plans   │ │ naming  │ │   │
//! │  │  └─────────┘ └─────────┘ └──────────┘ └──────────┘ └─────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                apothecary-db (Database Layer)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Transaction, LineItem, ItemKind, statuses, actors
//! - [`money`] - Money type with integer arithmetic
//! - [`pricing`] - Canonical invoice totals
//! - [`lifecycle`] - Transition planning
//! - [`sequence`] - Transaction number formatting
//! - [`invoice`] - Invoice numbers, file names, documents
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use apothecary_core::lifecycle::{plan_transition, TransitionRequest};
//! use apothecary_core::{PaymentStatus, TransactionStatus, TransactionType};
//!
//! let plan = plan_transition(TransitionRequest {
//!     current: TransactionStatus::Draft,
//!     current_type: TransactionType::Draft,
//!     requested: None,
//!     payment_status: PaymentStatus::Paid,
//!     invoice_generated: false,
//!     items_changed: false,
//! })
//! .unwrap();
//!
//! assert_eq!(plan.to, TransactionStatus::Completed);
//! assert!(plan.deduct_inventory);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod invoice;
pub mod lifecycle;
pub mod money;
pub mod pricing;
pub mod sequence;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Prefix of every transaction number.
pub const TRANSACTION_NUMBER_PREFIX: &str = "TXN";

/// Directory (relative to the invoice storage root) holding rendered invoices.
pub const INVOICE_DIR: &str = "invoices";

/// Maximum lines on a single transaction.
pub const MAX_ITEMS_PER_TRANSACTION: usize = 200;

/// Maximum quantity on a single line.
pub const MAX_ITEM_QUANTITY: i64 = 9_999;

/// Highest accepted unit price (100,000,000.00).
///
/// Keeps `price × MAX_ITEM_QUANTITY × MAX_ITEMS_PER_TRANSACTION` inside `i64`.
pub const MAX_UNIT_PRICE_CENTS: i64 = 10_000_000_000;

/// Deepest composite nesting the cost resolver follows.
///
/// Bundles of products need 2 levels; the extra headroom covers bundles of
/// bundles. Anything deeper resolves to zero cost.
pub const MAX_COMPOSITE_DEPTH: usize = 4;
