//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  In a POS this shows up everywhere: a 10% discount on 33.35, an 18%     │
//! │  tax on the discounted figure, three-way split tenders. Accumulated    │
//! │  float error makes settlement checks flaky.                            │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Minor Units                                      │
//! │    3335 cents × 10% = 333.5 → rounds to 334, deterministically         │
//! │    Settlement compares integers against a 1-cent epsilon               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use bazaar_core::money::Money;
//!
//! let price = Money::from_cents(1099); // 10.99
//!
//! let doubled = price * 2;                     // 21.98
//! let line = price.multiply_quantity(3);       // 32.97
//! let tenth = price.percent_of(1000);          // 10% portion, 1.10
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents, paise, ...).
///
/// ## Design Decisions
/// - **i64 (signed)**: negative values appear in refunds and adjustments
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **No float constructor**: amounts enter the system already in minor units
///
/// Every monetary value in the engine flows through this type: batch prices,
/// cart lines, discounts, taxes, tendered amounts and change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // 10.99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major-unit portion (`1099` → `10`).
    #[inline]
    pub const fn major_units(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor-unit portion, always 0-99 (`1099` → `99`).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns the larger of two values.
    #[inline]
    pub const fn max(self, other: Self) -> Self {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    /// Returns the percentage portion of this amount, in basis points.
    ///
    /// This is the building block for both discounts and taxes:
    /// `subtotal.percent_of(1000)` is the 10% discount amount,
    /// `taxable.percent_of(1800)` the 18% tax amount.
    ///
    /// ## Implementation
    /// Integer math with round-half-up: `(amount × bps + 5000) / 10000`.
    /// The i128 intermediate prevents overflow on large amounts.
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::money::Money;
    ///
    /// let subtotal = Money::from_cents(10000); // 100.00
    /// assert_eq!(subtotal.percent_of(1000).cents(), 1000); // 10% = 10.00
    ///
    /// let odd = Money::from_cents(3335);
    /// assert_eq!(odd.percent_of(1000).cents(), 334); // 333.5 rounds up
    /// ```
    pub fn percent_of(&self, bps: u32) -> Money {
        let portion = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(portion as i64)
    }

    /// Calculates the tax amount for this value at the given rate.
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::money::Money;
    /// use bazaar_core::types::TaxRate;
    ///
    /// let taxable = Money::from_cents(9000);   // 90.00
    /// let rate = TaxRate::from_bps(1800);      // 18%
    /// assert_eq!(taxable.calculate_tax(rate).cents(), 1620); // 16.20
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percent_of(rate.bps())
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Applies a percentage discount and returns the remaining amount.
    ///
    /// ## Arguments
    /// * `discount_bps` - Discount in basis points (1000 = 10%)
    ///
    /// ## Example
    /// ```rust
    /// use bazaar_core::money::Money;
    ///
    /// let subtotal = Money::from_cents(10000);
    /// assert_eq!(subtotal.apply_percentage_discount(1000).cents(), 9000);
    /// ```
    pub fn apply_percentage_discount(&self, discount_bps: u32) -> Money {
        *self - self.percent_of(discount_bps)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display renders the plain decimal amount (`1099` → `10.99`).
///
/// ## Note
/// Currency symbols are a presentation concern; receipt rendering prepends
/// the configured symbol. Keeping Display neutral lets one build serve
/// stores billing in different currencies.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major_units().abs(), self.minor_part())
    }
}

/// Default money is zero.
impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Addition of two Money values.
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

/// Addition assignment (+=).
impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

/// Subtraction of two Money values.
impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

/// Subtraction assignment (-=).
impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by integer (for quantity calculations).
impl Mul<i32> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i32) -> Self {
        Money(self.0 * qty as i64)
    }
}

/// Multiplication by i64.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
