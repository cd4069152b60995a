//! Checkout error types.

use thiserror::Error;

use super::validator::ValidationError;
use crate::db::RepositoryError;
use crate::services::cart::CartError;
use crate::services::payment::GatewayError;

/// Errors that can occur while placing an order.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Something the customer can correct.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The payment session could not be created. The order stays pending
    /// and the cart stays active.
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("could not allocate a unique order number after {attempts} attempts")]
    OrderNumberExhausted { attempts: u32 },

    #[error("cart error: {0}")]
    Cart(#[from] CartError),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}
