//! Derived totals for carts and orders.

use rust_decimal::Decimal;

use crate::Money;

/// A line item reduced to what pricing needs: a unit price and a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub unit_price: Money,
    pub quantity: u32,
}

impl PricedLine {
    pub fn new(unit_price: Money, quantity: u32) -> Self {
        Self {
            unit_price,
            quantity,
        }
    }

    /// Unrounded `unit_price * quantity`.
    pub fn subtotal(&self) -> Decimal {
        self.unit_price.multiply(self.quantity)
    }
}

/// Owns total computation for carts and orders.
///
/// The total is `round(Σ unit_price * quantity, 2)`, summed exactly and
/// rounded once at the end, half-to-even. Persisting the result is the
/// caller's job and must happen in the same transaction as the line write
/// that triggered the recompute.
pub struct PricingLedger;

impl PricingLedger {
    /// Recomputes a total from the current lines.
    pub fn recompute<I>(lines: I) -> Money
    where
        I: IntoIterator<Item = PricedLine>,
    {
        let sum: Decimal = lines.into_iter().map(|line| line.subtotal()).sum();
        Money::new(sum)
    }
}
