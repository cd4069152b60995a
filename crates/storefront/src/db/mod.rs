//! Data access for the checkout pipeline.
//!
//! # Database: `jod_storefront`
//!
//! ## Tables
//!
//! - `users` - Identities handed over by the authentication provider
//! - `products` - Catalog rows the cart prices against
//! - `addresses` - Customer addresses (read-only here)
//! - `carts`, `cart_items` - Cart aggregate, one active cart per owner
//! - `orders`, `order_lines` - Immutable order snapshots
//! - `order_payments` - Gateway session and settlement state, 1:1 with orders
//! - `tower_sessions.session` - Session storage
//!
//! Services only see the traits below. [`postgres`] backs them with `sqlx`,
//! [`memory`] with an in-process store for tests and local runs.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p just-one-dollar-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use just_one_dollar_core::{
    CartId, CartItemId, CartOwner, CurrencyCode, GuestToken, OrderId, ProductId, UserId,
};

use crate::models::{
    Address, Cart, CartItem, NewOrder, Order, OrderPayment, Product, SettleResult,
    SettlementUpdate,
};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique violation to [`RepositoryError::Conflict`].
pub(crate) fn map_unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

// =============================================================================
// Repository Contracts
// =============================================================================

/// Persistence for the cart aggregate.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// The owner's active cart with its lines, if any.
    async fn find_active(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError>;

    /// Create an empty active cart, or return the one a concurrent request
    /// created first.
    async fn create_active(&self, owner: &CartOwner) -> Result<Cart, RepositoryError>;

    /// Add `quantity` units of a product, summing onto an existing line and
    /// refreshing its unit price. Every line change bumps the cart's
    /// `updated_at`.
    ///
    /// Returns [`RepositoryError::NotFound`] if the cart is not active and
    /// [`RepositoryError::Conflict`] if the line would exceed
    /// [`crate::models::MAX_LINE_QUANTITY`].
    async fn upsert_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartItem, RepositoryError>;

    /// Set a line's quantity. `None` if the line is not in this active cart.
    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError>;

    /// Delete a line. Returns whether a row was removed.
    async fn delete_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError>;

    /// Mark a cart inactive if it is active and its `updated_at` still
    /// equals `seen_at`. Returns whether this call flipped it.
    async fn deactivate(
        &self,
        cart_id: CartId,
        seen_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Move the guest's active cart into the user's active cart in one
    /// transaction and deactivate the guest cart.
    ///
    /// Lines are summed by product at the current product price and capped
    /// at [`crate::models::MAX_LINE_QUANTITY`]; lines for hidden products
    /// are dropped. Returns `None` when the guest has no
    /// active cart.
    async fn merge_guest_into_user(
        &self,
        guest: &GuestToken,
        user_id: UserId,
    ) -> Result<Option<Cart>, RepositoryError>;
}

/// Persistence for orders and their line snapshots.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order, its lines and a pending payment atomically.
    ///
    /// Returns [`RepositoryError::Conflict`] if the order number is taken.
    async fn create_with_payment(
        &self,
        order: &NewOrder,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError>;

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError>;

    /// A user's orders, newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, RepositoryError>;

    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError>;

    /// Pending orders created before `before`, oldest first.
    async fn list_stale_pending(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError>;
}

/// Persistence for the payment record paired with each order.
#[async_trait]
pub trait OrderPaymentRepository: Send + Sync {
    /// Record the gateway session created for an order.
    async fn attach_session(
        &self,
        order_id: OrderId,
        session_id: &str,
    ) -> Result<(), RepositoryError>;

    async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderPayment>, RepositoryError>;

    /// Complete the payment for `session_id` and its order, once.
    async fn settle(
        &self,
        session_id: &str,
        update: &SettlementUpdate,
    ) -> Result<SettleResult, RepositoryError>;
}

/// Read access to the product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;
}

/// Read access to customer addresses.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Addresses owned by the user, default first, then newest.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError>;
}

/// The repository set the services are built from.
#[derive(Clone)]
pub struct Repositories {
    pub carts: Arc<dyn CartRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn OrderPaymentRepository>,
    pub products: Arc<dyn ProductCatalog>,
    pub addresses: Arc<dyn AddressBook>,
}

impl Repositories {
    /// Repositories backed by `PostgreSQL`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            carts: Arc::new(postgres::PgCartRepository::new(pool.clone())),
            orders: Arc::new(postgres::PgOrderRepository::new(pool.clone())),
            payments: Arc::new(postgres::PgOrderPaymentRepository::new(pool.clone())),
            products: Arc::new(postgres::PgProductCatalog::new(pool.clone())),
            addresses: Arc::new(postgres::PgAddressBook::new(pool.clone())),
        }
    }

    /// Repositories sharing one in-memory store.
    #[must_use]
    pub fn memory(store: &Arc<memory::MemoryStore>) -> Self {
        Self {
            carts: store.clone(),
            orders: store.clone(),
            payments: store.clone(),
            products: store.clone(),
            addresses: store.clone(),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
