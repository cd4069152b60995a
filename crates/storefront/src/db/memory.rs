//! In-process implementation of every repository contract.
//!
//! Mirrors the `PostgreSQL` constraints (one active cart per owner, one line
//! per product, unique order numbers and gateway sessions) behind a single
//! `tokio` mutex, so each trait call is atomic the way a transaction is.
//! Used by the test suites and for running the service without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use just_one_dollar_core::{
    AddressId, CartId, CartItemId, CartOwner, CurrencyCode, GuestToken, OrderId, OrderLineId,
    OrderPaymentId, OrderStatus, PaymentStatus, ProductId, UserId,
};

use super::{
    AddressBook, CartRepository, OrderPaymentRepository, OrderRepository, ProductCatalog,
    RepositoryError,
};
use crate::models::{
    Address, Cart, CartItem, MAX_LINE_QUANTITY, NewOrder, Order, OrderLine, OrderPayment,
    Product, SettleResult, SettlementUpdate,
};

#[derive(Debug, Clone)]
struct CartRecord {
    id: CartId,
    owner: CartOwner,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ItemRecord {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(Debug, Default)]
struct State {
    next_id: i32,
    products: BTreeMap<ProductId, Product>,
    addresses: BTreeMap<AddressId, Address>,
    carts: BTreeMap<CartId, CartRecord>,
    items: BTreeMap<CartItemId, ItemRecord>,
    orders: BTreeMap<OrderId, Order>,
    payments: BTreeMap<OrderId, OrderPayment>,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn active_cart_id(&self, owner: &CartOwner) -> Option<CartId> {
        self.carts
            .values()
            .find(|c| c.is_active && &c.owner == owner)
            .map(|c| c.id)
    }

    fn is_active(&self, cart_id: CartId) -> bool {
        self.carts.get(&cart_id).is_some_and(|c| c.is_active)
    }

    fn item_view(&self, item: &ItemRecord) -> Result<CartItem, RepositoryError> {
        let product = self.products.get(&item.product_id).ok_or_else(|| {
            RepositoryError::DataCorruption(format!("cart item {} has no product", item.id))
        })?;
        Ok(CartItem {
            id: item.id,
            cart_id: item.cart_id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            product_name: product.name.clone(),
            product_sku: product.sku.clone(),
        })
    }

    fn cart_view(&self, cart_id: CartId) -> Result<Cart, RepositoryError> {
        let record = self.carts.get(&cart_id).ok_or(RepositoryError::NotFound)?;
        let items = self
            .items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .map(|i| self.item_view(i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Cart {
            id: record.id,
            owner: record.owner.clone(),
            is_active: record.is_active,
            items,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn create_cart(&mut self, owner: &CartOwner) -> CartId {
        let id = CartId::new(self.next_id());
        let now = Utc::now();
        self.carts.insert(
            id,
            CartRecord {
                id,
                owner: owner.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    /// Move a cart's `updated_at` strictly forward.
    fn touch(&mut self, cart_id: CartId) {
        if let Some(cart) = self.carts.get_mut(&cart_id) {
            let next = cart
                .updated_at
                .checked_add_signed(Duration::microseconds(1))
                .unwrap_or(cart.updated_at);
            cart.updated_at = next.max(Utc::now());
        }
    }

    fn line_for(&self, cart_id: CartId, product_id: ProductId) -> Option<&ItemRecord> {
        self.items
            .values()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
    }

    /// Write a line with an absolute quantity, creating it if needed.
    fn put_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        unit_price: Decimal,
    ) -> CartItemId {
        let existing = self.line_for(cart_id, product_id).map(|i| i.id);
        let id = existing.unwrap_or_else(|| CartItemId::new(self.next_id()));
        self.items.insert(
            id,
            ItemRecord {
                id,
                cart_id,
                product_id,
                quantity,
                unit_price,
            },
        );
        id
    }

    fn order_view(&self, order: &Order) -> Order {
        let mut order = order.clone();
        order.payment = self.payments.get(&order.id).cloned();
        order
    }
}

/// Repository set held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog product.
    pub async fn add_product(&self, name: &str, sku: &str, price: Decimal, visible: bool) -> Product {
        let mut state = self.state.lock().await;
        let product = Product {
            id: ProductId::new(state.next_id()),
            name: name.to_owned(),
            sku: sku.to_owned(),
            price,
            visible,
        };
        state.products.insert(product.id, product.clone());
        product
    }

    /// Replace a catalog product, e.g. to change its price or hide it.
    pub async fn update_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Add an address owned by `user_id`.
    pub async fn add_address(&self, user_id: UserId, first_name: &str) -> Address {
        let mut state = self.state.lock().await;
        let address = Address {
            id: AddressId::new(state.next_id()),
            user_id,
            first_name: first_name.to_owned(),
            last_name: "Customer".to_owned(),
            line1: "1 Market Street".to_owned(),
            line2: None,
            city: "Springfield".to_owned(),
            region: "IL".to_owned(),
            postal_code: "62701".to_owned(),
            country: "US".to_owned(),
            phone: None,
            is_default: false,
            created_at: Utc::now(),
        };
        state.addresses.insert(address.id, address.clone());
        address
    }

    /// Move an order's creation time, for exercising stale-order reports.
    pub async fn set_order_created_at(&self, order_id: OrderId, created_at: DateTime<Utc>) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.created_at = created_at;
        }
    }

    /// Every cart ever created for `owner`, active or not.
    pub async fn carts_for(&self, owner: &CartOwner) -> Vec<Cart> {
        let state = self.state.lock().await;
        state
            .carts
            .values()
            .filter(|c| &c.owner == owner)
            .filter_map(|c| state.cart_view(c.id).ok())
            .collect()
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn find_active(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError> {
        let state = self.state.lock().await;
        state
            .active_cart_id(owner)
            .map(|id| state.cart_view(id))
            .transpose()
    }

    async fn create_active(&self, owner: &CartOwner) -> Result<Cart, RepositoryError> {
        let mut state = self.state.lock().await;
        let id = match state.active_cart_id(owner) {
            Some(id) => id,
            None => state.create_cart(owner),
        };
        state.cart_view(id)
    }

    async fn upsert_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartItem, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.is_active(cart_id) {
            return Err(RepositoryError::NotFound);
        }
        if !state.products.contains_key(&product_id) {
            return Err(RepositoryError::DataCorruption(format!(
                "product {product_id} does not exist"
            )));
        }

        let current = state.line_for(cart_id, product_id).map_or(0, |i| i.quantity);
        let total = current
            .checked_add(quantity)
            .filter(|total| *total <= MAX_LINE_QUANTITY)
            .ok_or_else(|| {
                RepositoryError::Conflict(format!(
                    "line for product {product_id} would exceed {MAX_LINE_QUANTITY} units"
                ))
            })?;

        let item_id = state.put_line(cart_id, product_id, total, unit_price);
        state.touch(cart_id);
        let item = state.items.get(&item_id).ok_or(RepositoryError::NotFound)?;
        state.item_view(item)
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.is_active(cart_id) {
            return Ok(None);
        }
        let Some(item) = state
            .items
            .get_mut(&item_id)
            .filter(|i| i.cart_id == cart_id)
        else {
            return Ok(None);
        };
        item.quantity = quantity;
        let item = item.clone();
        state.touch(cart_id);
        state.item_view(&item).map(Some)
    }

    async fn delete_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.is_active(cart_id)
            || !state.items.get(&item_id).is_some_and(|i| i.cart_id == cart_id)
        {
            return Ok(false);
        }
        state.items.remove(&item_id);
        state.touch(cart_id);
        Ok(true)
    }

    async fn deactivate(
        &self,
        cart_id: CartId,
        seen_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.carts.get_mut(&cart_id) {
            Some(cart) if cart.is_active && cart.updated_at == seen_at => {
                cart.is_active = false;
                cart.updated_at = Utc::now().max(seen_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn merge_guest_into_user(
        &self,
        guest: &GuestToken,
        user_id: UserId,
    ) -> Result<Option<Cart>, RepositoryError> {
        let mut state = self.state.lock().await;

        let Some(guest_cart) = state.active_cart_id(&CartOwner::Guest(guest.clone())) else {
            return Ok(None);
        };
        let user_owner = CartOwner::User(user_id);
        let existing_user_cart = state.active_cart_id(&user_owner);

        // Work out every resulting line before writing any of them.
        let mut plan: Vec<(ProductId, i32, Decimal)> = Vec::new();
        for line in state.items.values().filter(|i| i.cart_id == guest_cart) {
            let price = match state.products.get(&line.product_id) {
                Some(p) if p.visible => p.price,
                _ => {
                    tracing::warn!(
                        product_id = %line.product_id,
                        "Dropped guest cart line for unavailable product"
                    );
                    continue;
                }
            };
            let current = existing_user_cart
                .and_then(|id| state.line_for(id, line.product_id))
                .map_or(0, |i| i.quantity);
            let quantity = current.saturating_add(line.quantity).min(MAX_LINE_QUANTITY);
            plan.push((line.product_id, quantity, price));
        }

        let user_cart = match existing_user_cart {
            Some(id) => id,
            None => state.create_cart(&user_owner),
        };
        for (product_id, quantity, price) in plan {
            state.put_line(user_cart, product_id, quantity, price);
        }
        state.touch(user_cart);

        if let Some(cart) = state.carts.get_mut(&guest_cart) {
            cart.is_active = false;
            cart.updated_at = Utc::now();
        }

        state.cart_view(user_cart).map(Some)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create_with_payment(
        &self,
        order: &NewOrder,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().await;
        if state
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict("order number already exists".into()));
        }

        let order_id = OrderId::new(state.next_id());
        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            lines.push(OrderLine {
                id: OrderLineId::new(state.next_id()),
                order_id,
                product_id: Some(line.product_id),
                quantity: line.quantity,
                unit_price: line.unit_price,
                name: line.name.clone(),
                sku: line.sku.clone(),
            });
        }

        let payment = OrderPayment {
            id: OrderPaymentId::new(state.next_id()),
            order_id,
            amount: order.totals.total,
            currency,
            gateway_session_id: None,
            gateway_payment_intent_id: None,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
        };

        let record = Order {
            id: order_id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            billing_address_id: order.billing_address_id,
            shipping_address_id: order.shipping_address_id,
            subtotal: order.totals.subtotal,
            tax: order.totals.tax,
            total: order.totals.total,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            lines,
            payment: None,
        };

        state.payments.insert(order_id, payment);
        state.orders.insert(order_id, record.clone());
        Ok(state.order_view(&record))
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .map(|o| state.order_view(o)))
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let skip = usize::try_from(offset).unwrap_or(0);
        let take = usize::try_from(limit).unwrap_or(0);
        Ok(orders
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|o| state.order_view(o))
            .collect())
    }

    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        let state = self.state.lock().await;
        let count = state.orders.values().filter(|o| o.user_id == user_id).count();
        i64::try_from(count).map_err(|_| RepositoryError::DataCorruption("order count overflow".into()))
    }

    async fn list_stale_pending(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < before)
            .map(|o| state.order_view(o))
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl OrderPaymentRepository for MemoryStore {
    async fn attach_session(
        &self,
        order_id: OrderId,
        session_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.payments.values().any(|p| {
            p.order_id != order_id && p.gateway_session_id.as_deref() == Some(session_id)
        }) {
            return Err(RepositoryError::Conflict("gateway session already exists".into()));
        }
        let payment = state
            .payments
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;
        payment.gateway_session_id = Some(session_id.to_owned());
        Ok(())
    }

    async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderPayment>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.gateway_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn settle(
        &self,
        session_id: &str,
        update: &SettlementUpdate,
    ) -> Result<SettleResult, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(payment) = state
            .payments
            .values_mut()
            .find(|p| p.gateway_session_id.as_deref() == Some(session_id))
        else {
            return Ok(SettleResult::UnknownSession);
        };

        let order_id = payment.order_id;
        if payment.payment_status == PaymentStatus::Completed {
            return Ok(SettleResult::AlreadySettled { order_id });
        }

        if let Some(intent) = &update.payment_intent_id {
            payment.gateway_payment_intent_id = Some(intent.clone());
        }
        if let Some(method) = &update.payment_method {
            payment.payment_method = Some(method.clone());
        }
        payment.payment_status = PaymentStatus::Completed;

        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::Completed;
        }
        Ok(SettleResult::Applied { order_id })
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }
}

#[async_trait]
impl AddressBook for MemoryStore {
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError> {
        let state = self.state.lock().await;
        let mut addresses: Vec<Address> = state
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(addresses)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn guest(token: &str) -> CartOwner {
        CartOwner::Guest(GuestToken::parse(token).unwrap())
    }

    #[tokio::test]
    async fn test_create_active_returns_existing_cart() {
        let store = MemoryStore::new();
        let owner = guest("tok-a");
        let first = store.create_active(&owner).await.unwrap();
        let second = store.create_active(&owner).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_upsert_refuses_inactive_cart() {
        let store = MemoryStore::new();
        let product = store.add_product("Mug", "MUG-1", Decimal::ONE, true).await;
        let cart = store.create_active(&guest("tok-b")).await.unwrap();
        assert!(store.deactivate(cart.id, cart.updated_at).await.unwrap());
        assert!(!store.deactivate(cart.id, cart.updated_at).await.unwrap());

        let result = store.upsert_item(cart.id, product.id, 1, Decimal::ONE).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_item_mutations_are_scoped_to_cart() {
        let store = MemoryStore::new();
        let product = store.add_product("Mug", "MUG-1", Decimal::ONE, true).await;
        let mine = store.create_active(&guest("mine")).await.unwrap();
        let theirs = store.create_active(&guest("theirs")).await.unwrap();
        let item = store.upsert_item(theirs.id, product.id, 1, Decimal::ONE).await.unwrap();

        assert!(store.set_item_quantity(mine.id, item.id, 5).await.unwrap().is_none());
        assert!(!store.delete_item(mine.id, item.id).await.unwrap());
        assert!(store.delete_item(theirs.id, item.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_line_changes_move_updated_at() {
        let store = MemoryStore::new();
        let product = store.add_product("Mug", "MUG-1", Decimal::ONE, true).await;
        let owner = guest("tok-c");
        let cart = store.create_active(&owner).await.unwrap();

        let item = store.upsert_item(cart.id, product.id, 1, Decimal::ONE).await.unwrap();
        let added = store.find_active(&owner).await.unwrap().unwrap();
        assert!(added.updated_at > cart.updated_at);

        store.set_item_quantity(cart.id, item.id, 3).await.unwrap();
        let updated = store.find_active(&owner).await.unwrap().unwrap();
        assert!(updated.updated_at > added.updated_at);

        assert!(!store.deactivate(cart.id, cart.updated_at).await.unwrap());
        assert!(store.deactivate(cart.id, updated.updated_at).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_rejects_line_over_limit() {
        let store = MemoryStore::new();
        let product = store.add_product("Mug", "MUG-1", Decimal::ONE, true).await;
        let owner = guest("tok-d");
        let cart = store.create_active(&owner).await.unwrap();
        store
            .upsert_item(cart.id, product.id, MAX_LINE_QUANTITY, Decimal::ONE)
            .await
            .unwrap();

        let over = store.upsert_item(cart.id, product.id, 1, Decimal::ONE).await;
        assert!(matches!(over, Err(RepositoryError::Conflict(_))));
        let cart = store.find_active(&owner).await.unwrap().unwrap();
        assert_eq!(cart.items[0].quantity, MAX_LINE_QUANTITY);
    }

    #[tokio::test]
    async fn test_merge_with_hidden_product_changes_nothing_else() {
        let store = MemoryStore::new();
        let mug = store.add_product("Mug", "MUG-1", Decimal::ONE, true).await;
        let mut pen = store.add_product("Pen", "PEN-1", Decimal::ONE, true).await;
        let guest_owner = guest("tok-e");
        let guest_cart = store.create_active(&guest_owner).await.unwrap();
        store.upsert_item(guest_cart.id, mug.id, 2, Decimal::ONE).await.unwrap();
        store.upsert_item(guest_cart.id, pen.id, 1, Decimal::ONE).await.unwrap();
        pen.visible = false;
        store.update_product(pen).await;

        let token = GuestToken::parse("tok-e").unwrap();
        let merged = store
            .merge_guest_into_user(&token, UserId::new(77))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(merged.items.len(), 1);
        assert_eq!(merged.items[0].product_id, mug.id);
        assert_eq!(merged.items[0].quantity, 2);
        assert!(store.find_active(&guest_owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_order_number_unique() {
        let store = MemoryStore::new();
        let new_order = NewOrder {
            order_number: "ORD-1-AAAA".into(),
            user_id: UserId::new(1),
            billing_address_id: AddressId::new(1),
            shipping_address_id: AddressId::new(1),
            totals: crate::models::OrderTotals::default(),
            lines: Vec::new(),
        };
        store.create_with_payment(&new_order, CurrencyCode::Usd).await.unwrap();
        let dup = store.create_with_payment(&new_order, CurrencyCode::Usd).await;
        assert!(matches!(dup, Err(RepositoryError::Conflict(_))));
    }
}
