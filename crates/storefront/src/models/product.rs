//! Catalog product as seen by the cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use just_one_dollar_core::ProductId;

/// A purchasable product.
///
/// Only the fields the cart and order snapshot need; browsing lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    /// Hidden products stay in the catalog but cannot be added to a cart.
    pub visible: bool,
}
