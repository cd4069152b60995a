//! Cart service.
//!
//! Business operations over the cart repository: fetch-or-create, line
//! mutations, item counts and the guest-to-user merge.

mod error;

pub use error::CartError;

use std::sync::Arc;

use tracing::{debug, info, instrument};

use just_one_dollar_core::{CartItemId, CartOwner, GuestToken, ProductId, UserId};

use crate::db::{CartRepository, ProductCatalog, RepositoryError};
use crate::models::{Cart, CartItem, MAX_LINE_QUANTITY};

/// Cart service.
///
/// Every mutation is scoped to the cart it is given, so a line id from
/// another owner's cart behaves like a missing line.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    products: Arc<dyn ProductCatalog>,
}

impl CartService {
    /// Create a new cart service.
    #[must_use]
    pub fn new(carts: Arc<dyn CartRepository>, products: Arc<dyn ProductCatalog>) -> Self {
        Self { carts, products }
    }

    /// Fetch the owner's active cart, creating an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart, CartError> {
        if let Some(cart) = self.carts.find_active(owner).await? {
            return Ok(cart);
        }

        let cart = self.carts.create_active(owner).await?;
        debug!(cart_id = %cart.id, "Created cart");
        Ok(cart)
    }

    /// The owner's active cart, without creating one.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    pub async fn find_cart(&self, owner: &CartOwner) -> Result<Option<Cart>, CartError> {
        Ok(self.carts.find_active(owner).await?)
    }

    /// Add a product to the cart.
    ///
    /// An existing line for the product has its quantity summed and its unit
    /// price refreshed to the current product price.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for quantities below 1,
    /// `CartError::QuantityLimit` if the line would exceed
    /// [`MAX_LINE_QUANTITY`], `CartError::ProductNotFound` / `CartError::ProductUnavailable` for
    /// products that cannot be bought, and `CartError::CartInactive` if the
    /// cart was merged or checked out concurrently.
    #[instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn add_item(
        &self,
        cart: &Cart,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(CartError::QuantityLimit {
                max: MAX_LINE_QUANTITY,
            });
        }

        let product = self
            .products
            .find_product(product_id)
            .await?
            .ok_or(CartError::ProductNotFound(product_id))?;
        if !product.visible {
            return Err(CartError::ProductUnavailable(product_id));
        }

        let item = self
            .carts
            .upsert_item(cart.id, product_id, quantity, product.price)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => CartError::CartInactive(cart.id),
                RepositoryError::Conflict(_) => CartError::QuantityLimit {
                    max: MAX_LINE_QUANTITY,
                },
                other => CartError::Repository(other),
            })?;

        debug!(item_id = %item.id, quantity = item.quantity, "Added to cart");
        Ok(item)
    }

    /// Set a line's quantity. Zero or negative removes the line.
    ///
    /// Returns the updated line, or `None` when it was removed.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ItemNotFound` when updating a line that is not in
    /// this cart and `CartError::QuantityLimit` above [`MAX_LINE_QUANTITY`].
    #[instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn update_item_quantity(
        &self,
        cart: &Cart,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, CartError> {
        if quantity <= 0 {
            self.remove_item(cart, item_id).await?;
            return Ok(None);
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(CartError::QuantityLimit {
                max: MAX_LINE_QUANTITY,
            });
        }

        self.carts
            .set_item_quantity(cart.id, item_id, quantity)
            .await?
            .map(Some)
            .ok_or(CartError::ItemNotFound(item_id))
    }

    /// Remove a line. Removing a line that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    #[instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn remove_item(&self, cart: &Cart, item_id: CartItemId) -> Result<(), CartError> {
        let removed = self.carts.delete_item(cart.id, item_id).await?;
        debug!(removed, "Removed cart item");
        Ok(())
    }

    /// Total units in the owner's active cart; `0` if there is no cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    #[instrument(skip(self))]
    pub async fn item_count(&self, owner: &CartOwner) -> Result<i64, CartError> {
        Ok(self
            .carts
            .find_active(owner)
            .await?
            .map_or(0, |cart| cart.item_count()))
    }

    /// Fold the guest's active cart into the user's active cart.
    ///
    /// Repeating the call is a no-op: the guest cart is inactive after the
    /// first run, so the user's cart is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    #[instrument(skip(self, guest))]
    pub async fn merge_guest_cart_into_user(
        &self,
        guest: &GuestToken,
        user_id: UserId,
    ) -> Result<Cart, CartError> {
        match self.carts.merge_guest_into_user(guest, user_id).await? {
            Some(cart) => {
                info!(cart_id = %cart.id, items = cart.items.len(), "Merged guest cart");
                Ok(cart)
            }
            None => self.get_or_create_cart(&CartOwner::User(user_id)).await,
        }
    }

    /// Retire a cart whose contents were captured into an order.
    ///
    /// Only succeeds while the cart is exactly as `cart` saw it; a cart
    /// changed since then stays active and this returns `false`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the store fails.
    pub async fn deactivate(&self, cart: &Cart) -> Result<bool, CartError> {
        Ok(self.carts.deactivate(cart.id, cart.updated_at).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::memory::MemoryStore;

    fn service(store: &Arc<MemoryStore>) -> CartService {
        CartService::new(store.clone(), store.clone())
    }

    fn guest(token: &str) -> GuestToken {
        GuestToken::parse(token).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let owner = CartOwner::Guest(guest("t1"));

        let first = carts.get_or_create_cart(&owner).await.unwrap();
        let second = carts.get_or_create_cart(&owner).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_active);
        assert!(first.is_empty());
    }

    #[tokio::test]
    async fn test_add_same_product_twice_sums_quantity() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::new(1200, 2), true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();

        carts.add_item(&cart, product.id, 2).await.unwrap();
        let item = carts.add_item(&cart, product.id, 3).await.unwrap();

        let cart = carts.get_or_create_cart(&cart.owner).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(item.quantity, 5);
        assert_eq!(cart.item_count(), 5);
    }

    #[tokio::test]
    async fn test_add_refreshes_unit_price() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let mut product = store.add_product("Tee", "TEE-1", Decimal::new(1200, 2), true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();
        carts.add_item(&cart, product.id, 1).await.unwrap();

        product.price = Decimal::new(1500, 2);
        store.update_product(product.clone()).await;
        let item = carts.add_item(&cart, product.id, 1).await.unwrap();

        assert_eq!(item.unit_price, Decimal::new(1500, 2));
        assert_eq!(item.quantity, 2);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_input() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let hidden = store.add_product("Old", "OLD-1", Decimal::ONE, false).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();

        assert!(matches!(
            carts.add_item(&cart, hidden.id, 0).await,
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            carts.add_item(&cart, ProductId::new(9999), 1).await,
            Err(CartError::ProductNotFound(_))
        ));
        assert!(matches!(
            carts.add_item(&cart, hidden.id, 1).await,
            Err(CartError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_line_quantity_is_capped() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();

        assert!(matches!(
            carts.add_item(&cart, product.id, i32::MAX).await,
            Err(CartError::QuantityLimit { .. })
        ));
        let item = carts.add_item(&cart, product.id, MAX_LINE_QUANTITY).await.unwrap();
        assert!(matches!(
            carts.add_item(&cart, product.id, 1).await,
            Err(CartError::QuantityLimit { .. })
        ));
        assert!(matches!(
            carts.update_item_quantity(&cart, item.id, MAX_LINE_QUANTITY + 1).await,
            Err(CartError::QuantityLimit { .. })
        ));

        let cart = carts.get_or_create_cart(&cart.owner).await.unwrap();
        assert_eq!(cart.item_count(), i64::from(MAX_LINE_QUANTITY));
    }

    #[tokio::test]
    async fn test_deactivate_skips_changed_cart() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let owner = CartOwner::Guest(guest("t1"));
        let seen = carts.get_or_create_cart(&owner).await.unwrap();
        carts.add_item(&seen, product.id, 1).await.unwrap();

        assert!(!carts.deactivate(&seen).await.unwrap());
        let current = carts.find_cart(&owner).await.unwrap().unwrap();
        assert!(current.is_active);

        assert!(carts.deactivate(&current).await.unwrap());
        assert!(carts.find_cart(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_caps_summed_quantity() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let token = guest("guest-token");
        let user = UserId::new(3);

        let guest_cart = carts.get_or_create_cart(&CartOwner::Guest(token.clone())).await.unwrap();
        carts.add_item(&guest_cart, product.id, MAX_LINE_QUANTITY).await.unwrap();
        let user_cart = carts.get_or_create_cart(&CartOwner::User(user)).await.unwrap();
        carts.add_item(&user_cart, product.id, 5).await.unwrap();

        let merged = carts.merge_guest_cart_into_user(&token, user).await.unwrap();

        assert_eq!(merged.items.len(), 1);
        assert_eq!(merged.items[0].quantity, MAX_LINE_QUANTITY);
    }

    #[tokio::test]
    async fn test_add_to_inactive_cart_fails() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();
        carts.deactivate(&cart).await.unwrap();

        assert!(matches!(
            carts.add_item(&cart, product.id, 1).await,
            Err(CartError::CartInactive(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_or_negative_quantity_removes_line() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let owner = CartOwner::Guest(guest("t1"));
        let cart = carts.get_or_create_cart(&owner).await.unwrap();

        let item = carts.add_item(&cart, product.id, 2).await.unwrap();
        assert!(carts.update_item_quantity(&cart, item.id, 0).await.unwrap().is_none());
        assert!(carts.get_or_create_cart(&owner).await.unwrap().is_empty());

        let item = carts.add_item(&cart, product.id, 2).await.unwrap();
        assert!(carts.update_item_quantity(&cart, item.id, -3).await.unwrap().is_none());
        assert!(carts.get_or_create_cart(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_quantity_sets_value() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();
        let item = carts.add_item(&cart, product.id, 2).await.unwrap();

        let updated = carts.update_item_quantity(&cart, item.id, 7).await.unwrap().unwrap();
        assert_eq!(updated.quantity, 7);

        assert!(matches!(
            carts.update_item_quantity(&cart, CartItemId::new(9999), 1).await,
            Err(CartError::ItemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_item_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let cart = carts.get_or_create_cart(&CartOwner::Guest(guest("t1"))).await.unwrap();
        let item = carts.add_item(&cart, product.id, 1).await.unwrap();

        carts.remove_item(&cart, item.id).await.unwrap();
        carts.remove_item(&cart, item.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_item_count_without_cart_is_zero() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let owner = CartOwner::Guest(guest("nobody"));

        assert_eq!(carts.item_count(&owner).await.unwrap(), 0);
        assert!(carts.find_cart(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_sums_lines_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let p1 = store.add_product("Tee", "TEE-1", Decimal::new(1200, 2), true).await;
        let p2 = store.add_product("Cap", "CAP-1", Decimal::new(800, 2), true).await;
        let token = guest("guest-token");
        let user = UserId::new(42);

        let guest_cart = carts.get_or_create_cart(&CartOwner::Guest(token.clone())).await.unwrap();
        carts.add_item(&guest_cart, p1.id, 2).await.unwrap();
        carts.add_item(&guest_cart, p2.id, 1).await.unwrap();

        let user_cart = carts.get_or_create_cart(&CartOwner::User(user)).await.unwrap();
        carts.add_item(&user_cart, p1.id, 1).await.unwrap();

        let merged = carts.merge_guest_cart_into_user(&token, user).await.unwrap();
        assert_eq!(merged.id, user_cart.id);
        assert_eq!(merged.items.len(), 2);
        let tee = merged.items.iter().find(|i| i.product_id == p1.id).unwrap();
        assert_eq!(tee.quantity, 3);

        let again = carts.merge_guest_cart_into_user(&token, user).await.unwrap();
        assert_eq!(again, merged);
        assert!(carts.find_cart(&CartOwner::Guest(token)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_without_guest_cart_returns_user_cart() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let user = UserId::new(7);

        let cart = carts.merge_guest_cart_into_user(&guest("fresh"), user).await.unwrap();
        assert_eq!(cart.owner, CartOwner::User(user));
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_merge_drops_hidden_products() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let mut product = store.add_product("Tee", "TEE-1", Decimal::ONE, true).await;
        let token = guest("guest-token");

        let guest_cart = carts.get_or_create_cart(&CartOwner::Guest(token.clone())).await.unwrap();
        carts.add_item(&guest_cart, product.id, 1).await.unwrap();
        product.visible = false;
        store.update_product(product).await;

        let merged = carts.merge_guest_cart_into_user(&token, UserId::new(1)).await.unwrap();
        assert!(merged.is_empty());
    }
}
