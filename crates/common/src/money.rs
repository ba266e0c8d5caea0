use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A monetary amount with exactly two decimal places.
///
/// Backed by a fixed-point [`Decimal`], so `99.99` stays `99.99` through
/// arithmetic, storage and JSON (serialized as a string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Number of decimal places every amount is kept at.
    pub const SCALE: u32 = 2;

    /// Creates an amount, rounding half-to-even to two decimal places.
    pub fn new(amount: Decimal) -> Self {
        let mut rounded =
            amount.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(Self::SCALE);
        Self(rounded)
    }

    /// Creates an amount from a whole number of cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, Self::SCALE))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self::from_cents(0)
    }

    /// Returns the underlying decimal amount.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Multiplies by a quantity without rounding the intermediate product.
    pub fn multiply(&self, quantity: u32) -> Decimal {
        self.0 * Decimal::from(quantity)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s).map(Self::new)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money::new(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_new_keeps_two_decimal_places() {
        assert_eq!(Money::new(dec("99.99")).to_string(), "99.99");
        assert_eq!(Money::new(dec("5")).to_string(), "5.00");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_new_rounds_half_to_even() {
        assert_eq!(Money::new(dec("0.125")).to_string(), "0.12");
        assert_eq!(Money::new(dec("0.135")).to_string(), "0.14");
        assert_eq!(Money::new(dec("2.675")).to_string(), "2.68");
        assert_eq!(Money::new(dec("1.0049")).to_string(), "1.00");
    }

    #[test]
    fn test_from_cents() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).amount(), dec("0.05"));
    }

    #[test]
    fn test_multiply_is_exact() {
        assert_eq!(Money::from_cents(999).multiply(3), dec("29.97"));
    }

    #[test]
    fn test_serializes_as_string_without_drift() {
        let money: Money = "99.99".parse().unwrap();
        let json = serde_json::to_string(&money).unwrap();
        assert_eq!(json, "\"99.99\"");

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);
    }

    #[test]
    fn test_sign_checks() {
        assert!(Money::zero().is_zero());
        assert!(!Money::zero().is_negative());
        assert!(Money::new(dec("-0.01")).is_negative());
    }
}
