//! Monetary amounts.
//!
//! All money in the storefront is computed by the backend (totals,
//! discounts, shipping, line subtotals). The client only carries the values
//! around and formats them, so [`Money`] deliberately has no arithmetic.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A monetary amount in Brazilian reais.
///
/// Deserializes from either a JSON number or a decimal string, matching what
/// the order API sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero reais.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Wrap a decimal amount.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Build an amount from integer cents (e.g. `1999` → `19.99`).
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R$ {:.2}", self.0.round_dp(2))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        assert_eq!(Money::from_cents(1999).amount(), Decimal::new(1999, 2));
        assert_eq!(Money::from_cents(0), Money::ZERO);
        assert_eq!(Money::from_cents(-250).amount(), Decimal::new(-250, 2));
    }

    #[test]
    fn test_display_two_decimals() {
        assert_eq!(Money::from_cents(1000).to_string(), "R$ 10.00");
        assert_eq!(Money::new(Decimal::new(905, 1)).to_string(), "R$ 90.50");
    }

    #[test]
    fn test_deserialize_number_and_string() {
        let from_number: Money = serde_json::from_str("10.5").unwrap();
        let from_string: Money = serde_json::from_str("\"10.50\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number, Money::from_cents(1050));
    }
}
