//! Product and address lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use just_one_dollar_core::{AddressId, ProductId, UserId};

use crate::db::{AddressBook, ProductCatalog, RepositoryError};
use crate::models::{Address, Product};

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    sku: String,
    price: Decimal,
    visible: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            sku: row.sku,
            price: row.price,
            visible: row.visible,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: AddressId,
    user_id: UserId,
    first_name: String,
    last_name: String,
    line1: String,
    line2: Option<String>,
    city: String,
    region: String,
    postal_code: String,
    country: String,
    phone: Option<String>,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            first_name: row.first_name,
            last_name: row.last_name,
            line1: row.line1,
            line2: row.line2,
            city: row.city,
            region: row.region,
            postal_code: row.postal_code,
            country: row.country,
            phone: row.phone,
            is_default: row.is_default,
            created_at: row.created_at,
        }
    }
}

/// Product catalog backed by the `products` table.
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, sku, price, visible FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }
}

/// Address book backed by the `addresses` table.
#[derive(Clone)]
pub struct PgAddressBook {
    pool: PgPool,
}

impl PgAddressBook {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressBook for PgAddressBook {
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT id, user_id, first_name, last_name, line1, line2, city, region,
                   postal_code, country, phone, is_default, created_at
            FROM addresses
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Address::from).collect())
    }
}
