//! Order totals.

use rust_decimal::Decimal;

use just_one_dollar_core::round_money;

use crate::models::{CartItem, OrderTotals};

/// A price and quantity pair, the only inputs totals depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub price: Decimal,
    pub quantity: i32,
}

impl From<&CartItem> for PricedLine {
    fn from(item: &CartItem) -> Self {
        Self {
            price: item.unit_price,
            quantity: item.quantity,
        }
    }
}

/// Subtotal, flat-rate tax and total for a set of lines.
///
/// Tax is rounded to the cent, half away from zero; the total is the sum of
/// the subtotal and the rounded tax, so it always matches what is charged.
#[must_use]
pub fn calculate_totals(lines: &[PricedLine], tax_rate: Decimal) -> OrderTotals {
    let subtotal: Decimal = lines
        .iter()
        .map(|line| line.price * Decimal::from(line.quantity))
        .sum();
    let tax = round_money(subtotal * tax_rate);

    OrderTotals {
        subtotal,
        tax,
        total: subtotal + tax,
    }
}
