//! Step and status enums.

use serde::{Deserialize, Serialize};

/// A step of the checkout flow, in order.
///
/// Steps only move forward one at a time, through each step's gate; moving
/// back to an earlier step is always allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Read-only review of lines and totals.
    #[default]
    Summary,
    /// Address selection and shipping calculation.
    Address,
    /// Final review before placing the order.
    Confirmation,
}

impl CheckoutStep {
    /// All steps in flow order.
    pub const ALL: [Self; 3] = [Self::Summary, Self::Address, Self::Confirmation];

    /// The step after this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Summary => Some(Self::Address),
            Self::Address => Some(Self::Confirmation),
            Self::Confirmation => None,
        }
    }

    /// One-based position, for "step 2 of 3" indicators.
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            Self::Summary => 1,
            Self::Address => 2,
            Self::Confirmation => 3,
        }
    }
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Address => write!(f, "address"),
            Self::Confirmation => write!(f, "confirmation"),
        }
    }
}

impl std::str::FromStr for CheckoutStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "address" => Ok(Self::Address),
            "confirmation" => Ok(Self::Confirmation),
            _ => Err(format!("invalid checkout step: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert!(CheckoutStep::Summary < CheckoutStep::Address);
        assert!(CheckoutStep::Address < CheckoutStep::Confirmation);
        assert_eq!(CheckoutStep::Summary.next(), Some(CheckoutStep::Address));
        assert_eq!(CheckoutStep::Confirmation.next(), None);
        assert_eq!(CheckoutStep::Confirmation.position(), 3);
    }

    #[test]
    fn test_step_round_trips_through_text() {
        for step in CheckoutStep::ALL {
            assert_eq!(step.to_string().parse::<CheckoutStep>().unwrap(), step);
        }
        assert!("payment".parse::<CheckoutStep>().is_err());
    }
}
