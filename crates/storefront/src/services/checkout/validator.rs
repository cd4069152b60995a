//! Checkout validation.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use just_one_dollar_core::{AddressId, CartOwner, UserId};

use super::CheckoutError;
use crate::db::{AddressBook, CartRepository};
use crate::models::{Address, Cart};

/// Which address a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    Billing,
    Shipping,
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Billing => "billing",
            Self::Shipping => "shipping",
        })
    }
}

/// User-correctable reasons a checkout cannot proceed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Your cart is empty")]
    EmptyCart,

    /// The address is missing or not one of the customer's.
    #[error("Please choose a valid {0} address")]
    InvalidAddress(AddressRole),
}

/// The cart and addresses a checkout was validated against.
#[derive(Debug, Clone)]
pub struct ValidatedCheckout {
    pub cart: Cart,
    pub billing: Address,
    pub shipping: Address,
}

/// Checks that a user's checkout request can become an order.
#[derive(Clone)]
pub struct CheckoutValidator {
    carts: Arc<dyn CartRepository>,
    addresses: Arc<dyn AddressBook>,
}

impl CheckoutValidator {
    #[must_use]
    pub fn new(carts: Arc<dyn CartRepository>, addresses: Arc<dyn AddressBook>) -> Self {
        Self { carts, addresses }
    }

    /// Validate the user's active cart and chosen addresses.
    ///
    /// An empty cart is reported before any address problem. Addresses are
    /// only looked up among the user's own, so someone else's address is
    /// indistinguishable from a missing one.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` for problems the customer can fix
    /// and `CheckoutError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        user_id: UserId,
        billing_address_id: AddressId,
        shipping_address_id: AddressId,
    ) -> Result<ValidatedCheckout, CheckoutError> {
        let cart = match self.carts.find_active(&CartOwner::User(user_id)).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(ValidationError::EmptyCart.into()),
        };

        let addresses = self.addresses.list_for_user(user_id).await?;
        let find = |id: AddressId| addresses.iter().find(|a| a.id == id).cloned();

        let Some(billing) = find(billing_address_id) else {
            return Err(ValidationError::InvalidAddress(AddressRole::Billing).into());
        };
        let Some(shipping) = find(shipping_address_id) else {
            return Err(ValidationError::InvalidAddress(AddressRole::Shipping).into());
        };

        Ok(ValidatedCheckout {
            cart,
            billing,
            shipping,
        })
    }
}
