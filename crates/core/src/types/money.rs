//! Money amounts in minor currency units.
//!
//! Catalog prices are authored in major units (`150.00`), the payment
//! provider and the shipping tables speak integer cents. [`Cents`] is the
//! common currency of the crate; conversions from [`Decimal`] round half away
//! from zero.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Mul, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// An amount in the smallest currency unit (cents for EUR).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create an amount from a cent value.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Get the underlying cent value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Convert a major-unit decimal (`12.345`) to cents (`1235`).
    ///
    /// Returns `None` when the value does not fit in an `i64`.
    #[must_use]
    pub fn from_major(amount: Decimal) -> Option<Self> {
        amount
            .checked_mul(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Self)
    }

    /// Convert back to a major-unit decimal.
    #[must_use]
    pub fn to_major(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Render as `1 234,56 EUR` with the given currency code.
    #[must_use]
    pub fn format(self, currency: &str) -> String {
        format!("{self} {}", currency.to_uppercase())
    }
}

impl fmt::Display for Cents {
    /// French formatting: space thousands separator, comma decimals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let units = (abs / 100).to_string();
        let minor = abs % 100;

        let mut grouped = String::with_capacity(units.len() + units.len() / 3);
        for (i, c) in units.chars().enumerate() {
            if i > 0 && (units.len() - i) % 3 == 0 {
                grouped.push(' ');
            }
            grouped.push(c);
        }

        write!(f, "{sign}{grouped},{minor:02}")
    }
}

impl Add for Cents {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cents {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Cents {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u32> for Cents {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        Self(self.0.saturating_mul(i64::from(rhs)))
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl From<i64> for Cents {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}
