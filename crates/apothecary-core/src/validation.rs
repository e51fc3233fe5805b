//! # Validation Module
//!
//! Input validation run before any lifecycle transition.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request shape (serde deserialization)                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE: item names, quantities, amounts                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Discount policy (engine, keyed by actor role)                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Database constraints (UNIQUE, CHECK)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use apothecary_core::validation::{validate_item_name, validate_quantity};
//!
//! assert!(validate_item_name(0, "Chamomile tea").is_ok());
//! assert!(validate_item_name(0, "New Item").is_err());
//! assert!(validate_quantity(5).is_ok());
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::LineItem;
use crate::{MAX_ITEMS_PER_TRANSACTION, MAX_ITEM_QUANTITY, MAX_UNIT_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Names the item editor shows before the user picks something real.
const PLACEHOLDER_NAMES: &[&str] = &[
    "new item",
    "item name",
    "untitled",
    "select product",
    "select item",
    "-",
];

const MAX_NAME_LEN: usize = 200;

// =============================================================================
// Item Validators
// =============================================================================

/// Validates the name of the line at `index`.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Must not be one of the editor placeholders (case-insensitive)
/// - At most 200 characters
pub fn validate_item_name(index: usize, name: &str) -> ValidationResult<()> {
    let field = format!("items[{}].name", index);
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required { field });
    }

    let lowered = name.to_lowercase();
    if PLACEHOLDER_NAMES.contains(&lowered.as_str()) {
        return Err(ValidationError::Placeholder {
            field,
            value: name.to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (complimentary items).
///
/// ```rust
/// use apothecary_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents(1099).is_ok());
/// assert!(validate_price_cents(0).is_ok());
/// assert!(validate_price_cents(-100).is_err());
/// assert!(validate_price_cents(i64::MAX / 2).is_err());
/// ```
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    if cents > MAX_UNIT_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: MAX_UNIT_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a discount against the amount it applies to.
pub fn validate_discount_cents(field: &str, discount: i64, base: i64) -> ValidationResult<()> {
    if discount < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    if discount > base.max(0) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: base.max(0),
        });
    }

    Ok(())
}

/// Validates every line of a transaction.
///
/// `check_names` is false for autosaves, where half-typed lines are expected.
pub fn validate_items(items: &[LineItem], check_names: bool) -> CoreResult<()> {
    if items.len() > MAX_ITEMS_PER_TRANSACTION {
        return Err(CoreError::TooManyItems {
            max: MAX_ITEMS_PER_TRANSACTION,
        });
    }

    for (index, item) in items.iter().enumerate() {
        if check_names {
            validate_item_name(index, &item.name)?;
        }
        if item.quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: item.quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }
        validate_quantity(item.quantity)?;
        validate_price_cents(item.unit_price_cents)?;
        let gross = Money::from_cents(item.unit_price_cents)
            .checked_multiply_quantity(item.quantity)
            .ok_or_else(|| ValidationError::OutOfRange {
                field: format!("items[{}].unit_price", index),
                min: 0,
                max: MAX_UNIT_PRICE_CENTS,
            })?;
        validate_discount_cents(
            &format!("items[{}].discount", index),
            item.discount_cents,
            gross.cents(),
        )?;
        if let Some(cost) = item.cost_price_cents {
            if cost < 0 {
                return Err(ValidationError::MustNotBeNegative {
                    field: format!("items[{}].cost_price", index),
                }
                .into());
            }
        }
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ```rust
/// use apothecary_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
