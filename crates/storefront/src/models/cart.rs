//! Cart aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use just_one_dollar_core::{CartId, CartItemId, CartOwner, ProductId};

/// Most units a single cart line may hold. Enforced by the `cart_items`
/// check constraint as well.
pub const MAX_LINE_QUANTITY: i32 = 999;

/// A shopping cart and its lines.
///
/// `is_active = false` marks a cart that was merged or converted into an
/// order; such carts are never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: CartOwner,
    pub is_active: bool,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One product line in a cart. At most one per `(cart_id, product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i32,
    /// Product price when the line was last added to.
    pub unit_price: Decimal,
    pub product_name: String,
    pub product_sku: String,
}

impl Cart {
    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|item| i64::from(item.quantity)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn item(&self, id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

impl CartItem {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}
