//! Order creation.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, instrument, warn};

use just_one_dollar_core::{CurrencyCode, UserId};

use super::CheckoutError;
use super::validator::ValidatedCheckout;
use crate::db::{OrderRepository, RepositoryError};
use crate::models::{NewOrder, NewOrderLine, Order, OrderTotals};

/// Attempts at a fresh order number before giving up.
pub const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

const ORDER_NUMBER_PREFIX: &str = "ORD";
const SUFFIX_LENGTH: usize = 4;

/// A human-readable order number: `ORD-<base36 millis>-<4 random>`.
///
/// Not unique by construction; the store's unique constraint decides.
#[must_use]
pub fn generate_order_number() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LENGTH)
        .filter_map(|_| char::from_digit(rng.random_range(0..36), 36))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    format!("{ORDER_NUMBER_PREFIX}-{}-{suffix}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    let mut digits = Vec::new();
    loop {
        let digit = u32::try_from(value % 36).unwrap_or_default();
        digits.extend(char::from_digit(digit, 36).map(|c| c.to_ascii_uppercase()));
        value /= 36;
        if value == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

/// Turns a validated checkout into a pending order with a pending payment.
#[derive(Clone)]
pub struct OrderFactory {
    orders: Arc<dyn OrderRepository>,
    currency: CurrencyCode,
    next_number: fn() -> String,
}

impl OrderFactory {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>, currency: CurrencyCode) -> Self {
        Self {
            orders,
            currency,
            next_number: generate_order_number,
        }
    }

    /// Replace the order number source.
    #[must_use]
    pub fn with_number_generator(mut self, next_number: fn() -> String) -> Self {
        self.next_number = next_number;
        self
    }

    /// Persist the order, one line per cart line, and its pending payment.
    ///
    /// Lines copy the cart line's name, sku and unit price as they are now.
    /// The cart itself is left alone.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::OrderNumberExhausted` if every attempt hit an
    /// existing order number, or `CheckoutError::Repository` on store failure.
    #[instrument(skip(self, checkout, totals), fields(cart_id = %checkout.cart.id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        checkout: &ValidatedCheckout,
        totals: OrderTotals,
    ) -> Result<Order, CheckoutError> {
        let lines: Vec<NewOrderLine> = checkout
            .cart
            .items
            .iter()
            .map(|item| NewOrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                name: item.product_name.clone(),
                sku: item.product_sku.clone(),
            })
            .collect();

        let mut new_order = NewOrder {
            order_number: String::new(),
            user_id,
            billing_address_id: checkout.billing.id,
            shipping_address_id: checkout.shipping.id,
            totals,
            lines,
        };

        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            new_order.order_number = (self.next_number)();
            match self.orders.create_with_payment(&new_order, self.currency).await {
                Ok(order) => {
                    debug!(order_number = %order.order_number, "Created order");
                    return Ok(order);
                }
                Err(RepositoryError::Conflict(_)) => {
                    warn!(
                        attempt,
                        order_number = %new_order.order_number,
                        "Order number collision, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CheckoutError::OrderNumberExhausted {
            attempts: MAX_ORDER_NUMBER_ATTEMPTS,
        })
    }
}
