//! Checkout orchestration.
//!
//! # Flow
//!
//! 1. Validate the user's cart and addresses
//! 2. Price the cart
//! 3. Create the order with a pending payment (retrying order numbers)
//! 4. Open a hosted payment session
//! 5. Record the session id on the payment
//! 6. Deactivate the cart
//!
//! A gateway failure in step 4 leaves the order `PENDING` and the cart
//! active, so the customer can simply try again.

mod error;
mod order_factory;
mod totals;
mod validator;

pub use error::CheckoutError;
pub use order_factory::{MAX_ORDER_NUMBER_ATTEMPTS, OrderFactory, generate_order_number};
pub use totals::{PricedLine, calculate_totals};
pub use validator::{AddressRole, CheckoutValidator, ValidatedCheckout, ValidationError};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use just_one_dollar_core::{AddressId, CartOwner, UserId};

use crate::db::{AddressBook, OrderPaymentRepository, OrderRepository, Repositories};
use crate::models::{Address, Cart, CurrentUser, Order, OrderPage, OrderTotals};
use crate::services::cart::CartService;
use crate::services::payment::{CheckoutSessionRequest, PaymentGateway, SessionLine};

/// Name of the line that carries tax on the hosted payment page.
const TAX_LINE_NAME: &str = "Sales tax";

/// What the checkout page needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutData {
    pub cart: Option<Cart>,
    pub addresses: Vec<Address>,
    pub has_cart_items: bool,
    pub totals: OrderTotals,
}

/// A placed order waiting for payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_number: String,
    pub redirect_url: String,
    #[serde(skip)]
    pub session_id: String,
}

/// Checkout service.
#[derive(Clone)]
pub struct CheckoutService {
    carts: CartService,
    validator: CheckoutValidator,
    factory: OrderFactory,
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn OrderPaymentRepository>,
    addresses: Arc<dyn AddressBook>,
    gateway: Arc<dyn PaymentGateway>,
    tax_rate: Decimal,
}

impl CheckoutService {
    /// Create a new checkout service.
    #[must_use]
    pub fn new(
        repos: &Repositories,
        gateway: Arc<dyn PaymentGateway>,
        factory: OrderFactory,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            carts: CartService::new(repos.carts.clone(), repos.products.clone()),
            validator: CheckoutValidator::new(repos.carts.clone(), repos.addresses.clone()),
            factory,
            orders: repos.orders.clone(),
            payments: repos.payments.clone(),
            addresses: repos.addresses.clone(),
            gateway,
            tax_rate,
        }
    }

    /// Price a set of lines at the configured tax rate.
    #[must_use]
    pub fn totals_for(&self, lines: &[PricedLine]) -> OrderTotals {
        calculate_totals(lines, self.tax_rate)
    }

    /// The user's cart, addresses and running totals.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn checkout_data(&self, user_id: UserId) -> Result<CheckoutData, CheckoutError> {
        let cart = self.carts.find_cart(&CartOwner::User(user_id)).await?;
        let addresses = self.addresses.list_for_user(user_id).await?;

        let lines: Vec<PricedLine> = cart
            .iter()
            .flat_map(|c| c.items.iter().map(PricedLine::from))
            .collect();
        let has_cart_items = !lines.is_empty();

        Ok(CheckoutData {
            totals: self.totals_for(&lines),
            cart,
            addresses,
            has_cart_items,
        })
    }

    /// Turn the user's cart into a pending order and a hosted payment page.
    ///
    /// # Errors
    ///
    /// - `CheckoutError::Validation` for an empty cart or a foreign address
    /// - `CheckoutError::Gateway` if the payment session cannot be created;
    ///   the order is left pending and the cart active
    /// - `CheckoutError::OrderNumberExhausted` / `CheckoutError::Repository`
    ///   for storage problems
    #[instrument(skip(self, customer, return_base_url), fields(user_id = %customer.id))]
    pub async fn place_order(
        &self,
        customer: &CurrentUser,
        billing_address_id: AddressId,
        shipping_address_id: AddressId,
        return_base_url: &str,
    ) -> Result<PlacedOrder, CheckoutError> {
        let checkout = self
            .validator
            .validate(customer.id, billing_address_id, shipping_address_id)
            .await?;

        let lines: Vec<PricedLine> = checkout.cart.items.iter().map(PricedLine::from).collect();
        let totals = self.totals_for(&lines);

        let order = self.factory.create_order(customer.id, &checkout, totals).await?;

        let request = session_request(&order, customer, return_base_url);
        let session = match self.gateway.create_checkout_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    order_number = %order.order_number,
                    error = %e,
                    "Payment session failed; order left pending"
                );
                return Err(e.into());
            }
        };

        self.payments
            .attach_session(order.id, &session.session_id)
            .await?;

        // Lines added while the session was being opened are not part of
        // this order, so a cart that moved stays active for the next checkout.
        if !self.carts.deactivate(&checkout.cart).await? {
            warn!(
                cart_id = %checkout.cart.id,
                order_number = %order.order_number,
                "Cart changed during checkout; left active"
            );
        }

        info!(
            order_number = %order.order_number,
            session_id = %session.session_id,
            total = %order.total,
            "Order placed"
        );

        Ok(PlacedOrder {
            order_number: order.order_number,
            redirect_url: session.redirect_url,
            session_id: session.session_id,
        })
    }

    /// Look up one of the user's orders. Orders of other users read as absent.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn order_for_user(
        &self,
        order_number: &str,
        user_id: UserId,
    ) -> Result<Option<Order>, CheckoutError> {
        Ok(self
            .orders
            .find_by_number(order_number)
            .await?
            .filter(|order| order.user_id == user_id))
    }

    /// A page of the user's orders, newest first. `page` starts at 1.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn orders_for_user(
        &self,
        user_id: UserId,
        page: i64,
        per_page: i64,
    ) -> Result<OrderPage, CheckoutError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let total = self.orders.count_for_user(user_id).await?;
        let orders = self
            .orders
            .list_for_user(user_id, per_page, (page - 1).saturating_mul(per_page))
            .await?;

        Ok(OrderPage::new(orders, total, page, per_page))
    }

    /// Pending orders older than `older_than`, oldest first.
    ///
    /// Report only; nothing is changed.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the store fails.
    pub async fn stale_pending_orders(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Order>, CheckoutError> {
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.orders.list_stale_pending(cutoff).await?)
    }
}

/// Build the gateway request for an order.
///
/// Tax is passed as its own line so the charged amount equals the order
/// total.
fn session_request(
    order: &Order,
    customer: &CurrentUser,
    return_base_url: &str,
) -> CheckoutSessionRequest {
    let mut lines: Vec<SessionLine> = order
        .lines
        .iter()
        .map(|line| SessionLine {
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();

    if order.tax > Decimal::ZERO {
        lines.push(SessionLine {
            name: TAX_LINE_NAME.to_string(),
            quantity: 1,
            unit_price: order.tax,
        });
    }

    CheckoutSessionRequest {
        order_id: order.id,
        order_number: order.order_number.clone(),
        lines,
        total: order.total,
        customer_email: customer.email.clone(),
        return_base_url: return_base_url.to_string(),
    }
}
