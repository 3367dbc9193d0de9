//! # Money Module
//!
//! Integer money for invoice arithmetic.
//!
//! ## Minor Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every amount is an i64 count of the currency's minor unit              │
//! │  (paisa, halalas, cents). The currency itself lives in the store's     │
//! │  BusinessSettings and never enters the arithmetic.                     │
//! │                                                                         │
//! │    Shirt wash   250 × 3   =   750                                       │
//! │    VAT 15%                 =   113   (112.5 rounded half away from 0)  │
//! │    Discount 10%            =    75                                      │
//! │    Grand total             =   788                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::quantity::{Quantity, QUANTITY_SCALE};
use crate::types::TaxRate;

/// A monetary amount in minor units. Negative values represent credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Wraps a raw minor-unit amount.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Price × quantity, rounded half away from zero to the minor unit.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    /// use tally_core::quantity::Quantity;
    ///
    /// // 2.5 kg at 3.99
    /// let line = Money::from_cents(399).multiply_quantity(Quantity::from_milli(2_500));
    /// assert_eq!(line.cents(), 998);
    /// ```
    pub fn multiply_quantity(&self, qty: Quantity) -> Self {
        let scaled = self.0 as i128 * qty.milli() as i128;
        let half = QUANTITY_SCALE as i128 / 2;
        let half = if scaled < 0 { -half } else { half };
        Money(((scaled + half) / QUANTITY_SCALE as i128) as i64)
    }

    /// Portion of this amount given in basis points, rounded half away from zero.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// // 10% of 7.50
    /// assert_eq!(Money::from_cents(750).portion_bps(1000).cents(), 75);
    /// // 15% of 7.50 = 1.125 -> 1.13
    /// assert_eq!(Money::from_cents(750).portion_bps(1500).cents(), 113);
    /// ```
    pub fn portion_bps(&self, bps: u32) -> Money {
        // i128 so large invoices cannot overflow the intermediate product
        let scaled = self.0 as i128 * bps as i128;
        let half = if scaled < 0 { -5_000 } else { 5_000 };
        Money(((scaled + half) / 10_000) as i64)
    }

    /// VAT due on this amount.
    #[inline]
    pub fn calculate_vat(&self, rate: TaxRate) -> Money {
        self.portion_bps(rate.bps())
    }

    /// Clamps negative amounts to zero.
    #[inline]
    pub fn non_negative(self) -> Money {
        if self.0 < 0 {
            Money::zero()
        } else {
            self
        }
    }
}

/// Two-decimal rendering without a currency symbol, for logs.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
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

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Money(cents)
    }
}
