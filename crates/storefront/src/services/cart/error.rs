//! Cart error types.

use thiserror::Error;

use just_one_dollar_core::{CartId, CartItemId, ProductId};

use crate::db::RepositoryError;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantities added to a cart must be positive.
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(i32),

    /// A line would hold more than the per-line maximum.
    #[error("a cart line holds at most {max} units")]
    QuantityLimit { max: i32 },

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The product exists but is not purchasable.
    #[error("product {0} is unavailable")]
    ProductUnavailable(ProductId),

    #[error("cart item {0} not found")]
    ItemNotFound(CartItemId),

    /// The cart was merged or checked out while the request was in flight.
    #[error("cart {0} is no longer active")]
    CartInactive(CartId),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}
