//! Cart repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{instrument, warn};

use just_one_dollar_core::{CartId, CartItemId, CartOwner, GuestToken, ProductId, UserId};

use crate::db::{CartRepository, RepositoryError};
use crate::models::{Cart, CartItem, MAX_LINE_QUANTITY};

const CART_COLUMNS: &str = "id, user_id, guest_token, is_active, created_at, updated_at";

/// Strictly later than the previous value, so checkout can tell the cart moved.
const BUMPED_AT: &str = "GREATEST(clock_timestamp(), updated_at + interval '1 microsecond')";

const ITEM_SELECT: &str = r"
    SELECT ci.id, ci.cart_id, ci.product_id, ci.quantity, ci.unit_price,
           p.name AS product_name, p.sku AS product_sku
    FROM cart_items ci
    JOIN products p ON p.id = ci.product_id
";

#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    user_id: Option<UserId>,
    guest_token: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn into_cart(self, items: Vec<CartItem>) -> Result<Cart, RepositoryError> {
        let owner = match (self.user_id, self.guest_token) {
            (Some(user_id), None) => CartOwner::User(user_id),
            (None, Some(token)) => CartOwner::Guest(GuestToken::parse(&token).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid guest token on cart {}: {e}", self.id))
            })?),
            _ => {
                return Err(RepositoryError::DataCorruption(format!(
                    "cart {} must have exactly one owner",
                    self.id
                )));
            }
        };

        Ok(Cart {
            id: self.id,
            owner,
            is_active: self.is_active,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    quantity: i32,
    unit_price: Decimal,
    product_name: String,
    product_sku: String,
}

impl From<CartItemRow> for CartItem {
    fn from(row: CartItemRow) -> Self {
        Self {
            id: row.id,
            cart_id: row.cart_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            product_name: row.product_name,
            product_sku: row.product_sku,
        }
    }
}

/// Split an owner into the `(user_id, guest_token)` column pair.
fn owner_columns(owner: &CartOwner) -> (Option<UserId>, Option<&str>) {
    match owner {
        CartOwner::User(id) => (Some(*id), None),
        CartOwner::Guest(token) => (None, Some(token.as_str())),
    }
}

async fn fetch_active_row(
    conn: &mut PgConnection,
    owner: &CartOwner,
    for_update: bool,
) -> Result<Option<CartRow>, sqlx::Error> {
    let (user_id, guest_token) = owner_columns(owner);
    let lock = if for_update { "FOR UPDATE" } else { "" };
    let sql = format!(
        "SELECT {CART_COLUMNS} FROM carts
         WHERE is_active
           AND user_id IS NOT DISTINCT FROM $1
           AND guest_token IS NOT DISTINCT FROM $2
         {lock}"
    );

    sqlx::query_as::<_, CartRow>(&sql)
        .bind(user_id)
        .bind(guest_token)
        .fetch_optional(conn)
        .await
}

async fn insert_active_row(
    conn: &mut PgConnection,
    owner: &CartOwner,
) -> Result<Option<CartRow>, sqlx::Error> {
    let (user_id, guest_token) = owner_columns(owner);
    let sql = format!(
        "INSERT INTO carts (user_id, guest_token) VALUES ($1, $2)
         ON CONFLICT DO NOTHING
         RETURNING {CART_COLUMNS}"
    );

    sqlx::query_as::<_, CartRow>(&sql)
        .bind(user_id)
        .bind(guest_token)
        .fetch_optional(conn)
        .await
}

async fn fetch_items(
    conn: &mut PgConnection,
    cart_id: CartId,
) -> Result<Vec<CartItem>, sqlx::Error> {
    let sql = format!("{ITEM_SELECT} WHERE ci.cart_id = $1 ORDER BY ci.id");
    let rows = sqlx::query_as::<_, CartItemRow>(&sql)
        .bind(cart_id)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(CartItem::from).collect())
}

/// Bump an active cart's `updated_at`, taking its row lock for the rest of
/// the transaction. Returns false if the cart is missing or inactive.
async fn touch_active_cart(
    conn: &mut PgConnection,
    cart_id: CartId,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE carts SET updated_at = {BUMPED_AT} WHERE id = $1 AND is_active RETURNING id"
    );
    let touched = sqlx::query_scalar::<_, CartId>(&sql)
        .bind(cart_id)
        .fetch_optional(conn)
        .await?;
    Ok(touched.is_some())
}

/// Cart repository backed by the `carts` and `cart_items` tables.
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: CartRow) -> Result<Cart, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let items = fetch_items(&mut conn, row.id).await?;
        row.into_cart(items)
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    #[instrument(skip(self))]
    async fn find_active(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match fetch_active_row(&mut conn, owner, false).await? {
            Some(row) => {
                let items = fetch_items(&mut conn, row.id).await?;
                Ok(Some(row.into_cart(items)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn create_active(&self, owner: &CartOwner) -> Result<Cart, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(row) = insert_active_row(&mut conn, owner).await? {
            return row.into_cart(Vec::new());
        }

        // Lost the race against a concurrent create; use the winner's cart.
        let row = fetch_active_row(&mut conn, owner, false)
            .await?
            .ok_or_else(|| RepositoryError::Conflict("active cart changed concurrently".into()))?;
        drop(conn);
        self.load(row).await
    }

    #[instrument(skip(self))]
    async fn upsert_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<CartItem, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if !touch_active_cart(&mut tx, cart_id).await? {
            return Err(RepositoryError::NotFound);
        }

        // The conflict arm only fires while the summed line stays in range;
        // otherwise nothing is returned and the line is left as it was.
        let row = sqlx::query_as::<_, CartItemRow>(
            r"
            WITH upserted AS (
                INSERT INTO cart_items (cart_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (cart_id, product_id) DO UPDATE
                SET quantity = cart_items.quantity + EXCLUDED.quantity,
                    unit_price = EXCLUDED.unit_price,
                    updated_at = now()
                WHERE cart_items.quantity::bigint + EXCLUDED.quantity <= $5
                RETURNING id, cart_id, product_id, quantity, unit_price
            )
            SELECT u.id, u.cart_id, u.product_id, u.quantity, u.unit_price,
                   p.name AS product_name, p.sku AS product_sku
            FROM upserted u
            JOIN products p ON p.id = u.product_id
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .bind(unit_price)
        .bind(i64::from(MAX_LINE_QUANTITY))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(RepositoryError::Conflict(format!(
                "line for product {product_id} would exceed {MAX_LINE_QUANTITY} units"
            )));
        };
        tx.commit().await?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<Option<CartItem>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if !touch_active_cart(&mut tx, cart_id).await? {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, CartItemRow>(
            r"
            WITH updated AS (
                UPDATE cart_items
                SET quantity = $3, updated_at = now()
                WHERE id = $2 AND cart_id = $1
                RETURNING id, cart_id, product_id, quantity, unit_price
            )
            SELECT u.id, u.cart_id, u.product_id, u.quantity, u.unit_price,
                   p.name AS product_name, p.sku AS product_sku
            FROM updated u
            JOIN products p ON p.id = u.product_id
            ",
        )
        .bind(cart_id)
        .bind(item_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls back the touch when nothing matched.
        if row.is_some() {
            tx.commit().await?;
        }
        Ok(row.map(CartItem::from))
    }

    #[instrument(skip(self))]
    async fn delete_item(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if !touch_active_cart(&mut tx, cart_id).await? {
            return Ok(false);
        }

        let deleted = sqlx::query("DELETE FROM cart_items WHERE id = $2 AND cart_id = $1")
            .bind(cart_id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if deleted {
            tx.commit().await?;
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn deactivate(
        &self,
        cart_id: CartId,
        seen_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE carts SET is_active = FALSE, updated_at = clock_timestamp()
            WHERE id = $1 AND is_active AND updated_at = $2
            ",
        )
        .bind(cart_id)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn merge_guest_into_user(
        &self,
        guest: &GuestToken,
        user_id: UserId,
    ) -> Result<Option<Cart>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let guest_owner = CartOwner::Guest(guest.clone());
        let Some(guest_cart) = fetch_active_row(&mut tx, &guest_owner, true).await? else {
            return Ok(None);
        };

        let user_owner = CartOwner::User(user_id);
        let user_cart = match insert_active_row(&mut tx, &user_owner).await? {
            Some(row) => row,
            None => fetch_active_row(&mut tx, &user_owner, true)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Conflict("active cart changed concurrently".into())
                })?,
        };

        let skipped: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM cart_items gi
            JOIN products p ON p.id = gi.product_id
            WHERE gi.cart_id = $1 AND NOT p.visible
            ",
        )
        .bind(guest_cart.id)
        .fetch_one(&mut *tx)
        .await?;

        if skipped > 0 {
            warn!(
                guest_cart_id = %guest_cart.id,
                skipped,
                "Dropped guest cart lines for unavailable products"
            );
        }

        sqlx::query(
            r"
            INSERT INTO cart_items (cart_id, product_id, quantity, unit_price)
            SELECT $1, gi.product_id, LEAST(gi.quantity, $3), p.price
            FROM cart_items gi
            JOIN products p ON p.id = gi.product_id
            WHERE gi.cart_id = $2 AND p.visible
            ON CONFLICT (cart_id, product_id) DO UPDATE
            SET quantity = LEAST(cart_items.quantity::bigint + EXCLUDED.quantity, $3)::integer,
                unit_price = EXCLUDED.unit_price,
                updated_at = now()
            ",
        )
        .bind(user_cart.id)
        .bind(guest_cart.id)
        .bind(MAX_LINE_QUANTITY)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE carts SET is_active = FALSE, updated_at = clock_timestamp() WHERE id = $1",
        )
        .bind(guest_cart.id)
        .execute(&mut *tx)
        .await?;

        let user_cart = sqlx::query_as::<_, CartRow>(&format!(
            "UPDATE carts SET updated_at = {BUMPED_AT} WHERE id = $1 RETURNING {CART_COLUMNS}"
        ))
        .bind(user_cart.id)
        .fetch_one(&mut *tx)
        .await?;

        let items = fetch_items(&mut tx, user_cart.id).await?;
        tx.commit().await?;

        Ok(Some(user_cart.into_cart(items)?))
    }
}
