//! # Money Module
//!
//! Provides the `Money` type for every amount that flows through a
//! transaction: unit prices, line and bill discounts, captured cost prices
//! and invoice totals.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  A stored totalAmount that drifts by a fraction of a cent from          │
//! │  subtotal − discounts will be "self-healed" on every invoice touch,     │
//! │  forever. Integer cents make the equality exact.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use apothecary_core::money::Money;
//!
//! let unit_price = Money::from_cents(1000);
//! let line = unit_price.multiply_quantity(2);
//! let total = line + Money::from_cents(500) - Money::from_cents(200);
//! assert_eq!(total.cents(), 2300);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

/// One hundred percent in basis points.
pub const FULL_BPS: u32 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// Signed so that refunds and negative corrections can be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use apothecary_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1099).cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit amount by a quantity.
    ///
    /// ```rust
    /// use apothecary_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(299).multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// Like [`Money::multiply_quantity`], but `None` on overflow.
    ///
    /// ```rust
    /// use apothecary_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(299).checked_multiply_quantity(3), Some(Money::from_cents(897)));
    /// assert_eq!(Money::from_cents(i64::MAX / 2).checked_multiply_quantity(3), None);
    /// ```
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Splits a total evenly across `qty` units, rounding half away from zero.
    ///
    /// Used to turn a custom blend's total ingredient cost into a unit cost.
    /// Returns zero for a non-positive quantity rather than dividing by zero.
    ///
    /// ```rust
    /// use apothecary_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1000).per_unit(4).cents(), 250);
    /// assert_eq!(Money::from_cents(1000).per_unit(3).cents(), 333);
    /// assert_eq!(Money::from_cents(500).per_unit(0).cents(), 0);
    /// ```
    pub fn per_unit(&self, qty: i64) -> Money {
        if qty <= 0 {
            return Money::zero();
        }
        let total = self.0 as i128;
        let qty = qty as i128;
        let half = qty / 2;
        let rounded = if total >= 0 {
            (total + half) / qty
        } else {
            (total - half) / qty
        };
        Money(rounded as i64)
    }

    /// Expresses `self` as a share of `base` in basis points (1000 = 10%).
    ///
    /// A discount against a zero base is treated as a full (100%) discount,
    /// so it can never slip under a percentage limit.
    ///
    /// ```rust
    /// use apothecary_core::money::Money;
    ///
    /// let discount = Money::from_cents(250);
    /// assert_eq!(discount.share_bps_of(Money::from_cents(1000)), 2500);
    /// assert_eq!(discount.share_bps_of(Money::zero()), 10_000);
    /// ```
    pub fn share_bps_of(&self, base: Money) -> u32 {
        if self.0 <= 0 {
            return 0;
        }
        if base.0 <= 0 {
            return FULL_BPS;
        }
        let bps = (self.0 as i128 * FULL_BPS as i128 + base.0 as i128 / 2) / base.0 as i128;
        bps.min(u32::MAX as i128) as u32
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented formatting; invoices format through the renderer.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
