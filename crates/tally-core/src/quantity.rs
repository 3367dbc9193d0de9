//! # Quantity Module
//!
//! Fixed-point stock and line quantities.
//!
//! ## Thousandths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every quantity is an i64 count of thousandths of the product's unit.  │
//! │  Counted goods use whole values; weighed or measured goods (kg, liter) │
//! │  may carry up to three decimals.                                        │
//! │                                                                         │
//! │    JSON        stored        displayed                                  │
//! │    3           3000          3                                          │
//! │    2.5         2500          2.5                                        │
//! │    0.125       125           0.125                                      │
//! │                                                                         │
//! │  Ledger arithmetic (previous + delta = new) stays exact because it     │
//! │  never leaves integer space.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Thousandths per whole unit.
pub const QUANTITY_SCALE: i64 = 1_000;

/// A stock level, line quantity or ledger delta in thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct Quantity(i64);

impl Quantity {
    /// Wraps a raw count of thousandths.
    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    /// Whole units.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::quantity::Quantity;
    ///
    /// assert_eq!(Quantity::units(3).milli(), 3_000);
    /// assert_eq!(Quantity::from_milli(2_500).to_string(), "2.5");
    /// ```
    #[inline]
    pub const fn units(units: i64) -> Self {
        Quantity(units * QUANTITY_SCALE)
    }

    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_whole(&self) -> bool {
        self.0 % QUANTITY_SCALE == 0
    }

    /// Nearest thousandth of a decimal value. `None` for NaN, infinities and
    /// values outside the i64 range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * QUANTITY_SCALE as f64).round();
        if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
            return None;
        }
        Some(Quantity(scaled as i64))
    }

    #[inline]
    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / QUANTITY_SCALE as f64
    }
}

/// Shortest decimal rendering: `3`, `2.5`, `-0.125`.
impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / QUANTITY_SCALE as u64;
        let frac = abs % QUANTITY_SCALE as u64;
        if frac == 0 {
            return write!(f, "{}{}", sign, whole);
        }
        let digits = format!("{:03}", frac);
        write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}

// Whole quantities go out as JSON integers so counted goods read the same
// as they always have.
impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_whole() {
            serializer.serialize_i64(self.0 / QUANTITY_SCALE)
        } else {
            serializer.serialize_f64(self.to_f64())
        }
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal quantity")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        v.checked_mul(QUANTITY_SCALE)
            .map(Quantity)
            .ok_or_else(|| E::custom(format!("quantity {} out of range", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(QUANTITY_SCALE))
            .map(Quantity)
            .ok_or_else(|| E::custom(format!("quantity {} out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
        Quantity::from_f64(v).ok_or_else(|| E::custom(format!("quantity {} out of range", v)))
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), Add::add)
    }
}

/// Whole units.
impl From<i64> for Quantity {
    fn from(units: i64) -> Self {
        Quantity::units(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_trims_trailing_zeros() {
        assert_eq!(Quantity::units(3).to_string(), "3");
        assert_eq!(Quantity::from_milli(2_500).to_string(), "2.5");
        assert_eq!(Quantity::from_milli(125).to_string(), "0.125");
        assert_eq!(Quantity::from_milli(-250).to_string(), "-0.25");
    }

    #[test]
    fn test_json_accepts_integers_and_decimals() {
        let q: Quantity = serde_json::from_str("2.5").unwrap();
        assert_eq!(q.milli(), 2_500);
        let q: Quantity = serde_json::from_str("4").unwrap();
        assert_eq!(q, Quantity::units(4));
        let q: Quantity = serde_json::from_str("-1.75").unwrap();
        assert_eq!(q.milli(), -1_750);
        assert!(serde_json::from_str::<Quantity>("\"two\"").is_err());
    }

    #[test]
    fn test_json_output_keeps_whole_values_integral() {
        assert_eq!(serde_json::to_string(&Quantity::units(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Quantity::from_milli(2_500)).unwrap(), "2.5");
    }

    #[test]
    fn test_decimal_input_rounds_to_thousandths() {
        assert_eq!(Quantity::from_f64(0.1 + 0.2).unwrap().milli(), 300);
        assert_eq!(Quantity::from_f64(1.0004).unwrap().milli(), 1_000);
        assert!(Quantity::from_f64(f64::NAN).is_none());
        assert!(Quantity::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn test_arithmetic_is_exact() {
        let stock = Quantity::from_milli(10_000);
        let sold: Quantity = [Quantity::from_milli(2_500), Quantity::from_milli(1_250)]
            .into_iter()
            .sum();
        assert_eq!(stock - sold, Quantity::from_milli(6_250));
        assert!((Quantity::zero() - sold).is_negative());
    }
}
