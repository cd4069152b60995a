//! Order repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use just_one_dollar_core::{
    AddressId, CurrencyCode, OrderId, OrderLineId, OrderPaymentId, OrderStatus, PaymentStatus,
    ProductId, UserId,
};

use crate::db::{OrderRepository, RepositoryError, map_unique_violation};
use crate::models::{NewOrder, Order, OrderLine, OrderPayment};

const ORDER_COLUMNS: &str = "id, order_number, user_id, billing_address_id, shipping_address_id, \
                             subtotal, tax, total, status, created_at";

pub(super) const PAYMENT_COLUMNS: &str = "id, order_id, amount, currency, gateway_session_id, \
                                          gateway_payment_intent_id, payment_status, payment_method";

const LINE_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price, name, sku";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    user_id: UserId,
    billing_address_id: AddressId,
    shipping_address_id: AddressId,
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
    status: OrderStatus,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>, payment: Option<OrderPayment>) -> Order {
        Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            billing_address_id: self.billing_address_id,
            shipping_address_id: self.shipping_address_id,
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total,
            status: self.status,
            created_at: self.created_at,
            lines,
            payment,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderLineRow {
    id: OrderLineId,
    order_id: OrderId,
    product_id: Option<ProductId>,
    quantity: i32,
    unit_price: Decimal,
    name: String,
    sku: String,
}

impl From<OrderLineRow> for OrderLine {
    fn from(row: OrderLineRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            name: row.name,
            sku: row.sku,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct OrderPaymentRow {
    id: OrderPaymentId,
    order_id: OrderId,
    amount: Decimal,
    currency: String,
    gateway_session_id: Option<String>,
    gateway_payment_intent_id: Option<String>,
    payment_status: PaymentStatus,
    payment_method: Option<String>,
}

impl TryFrom<OrderPaymentRow> for OrderPayment {
    type Error = RepositoryError;

    fn try_from(row: OrderPaymentRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("payment {}: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            amount: row.amount,
            currency,
            gateway_session_id: row.gateway_session_id,
            gateway_payment_intent_id: row.gateway_payment_intent_id,
            payment_status: row.payment_status,
            payment_method: row.payment_method,
        })
    }
}

/// Attach lines and payments to a batch of order rows with two queries.
async fn hydrate(
    conn: &mut PgConnection,
    rows: Vec<OrderRow>,
) -> Result<Vec<Order>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i32> = rows.iter().map(|r| r.id.as_i32()).collect();

    let line_sql =
        format!("SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) ORDER BY id");
    let line_rows = sqlx::query_as::<_, OrderLineRow>(&line_sql)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

    let payment_sql =
        format!("SELECT {PAYMENT_COLUMNS} FROM order_payments WHERE order_id = ANY($1)");
    let payment_rows = sqlx::query_as::<_, OrderPaymentRow>(&payment_sql)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

    let mut lines: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
    for row in line_rows {
        lines.entry(row.order_id).or_default().push(row.into());
    }

    let mut payments: HashMap<OrderId, OrderPayment> = HashMap::new();
    for row in payment_rows {
        let payment = OrderPayment::try_from(row)?;
        payments.insert(payment.order_id, payment);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            row.into_order(lines.remove(&id).unwrap_or_default(), payments.remove(&id))
        })
        .collect())
}

/// Order repository backed by `orders`, `order_lines` and `order_payments`.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_details(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        hydrate(&mut conn, rows).await
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn create_with_payment(
        &self,
        order: &NewOrder,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let insert_sql = format!(
            "INSERT INTO orders (order_number, user_id, billing_address_id, shipping_address_id,
                                 subtotal, tax, total)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&insert_sql)
            .bind(&order.order_number)
            .bind(order.user_id)
            .bind(order.billing_address_id)
            .bind(order.shipping_address_id)
            .bind(order.totals.subtotal)
            .bind(order.totals.tax)
            .bind(order.totals.total)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_unique_violation(e, "order number"))?;

        let line_sql = format!(
            "INSERT INTO order_lines (order_id, product_id, quantity, unit_price, name, sku)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {LINE_COLUMNS}"
        );
        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let line_row = sqlx::query_as::<_, OrderLineRow>(&line_sql)
                .bind(row.id)
                .bind(line.product_id)
                .bind(line.quantity)
                .bind(line.unit_price)
                .bind(&line.name)
                .bind(&line.sku)
                .fetch_one(&mut *tx)
                .await?;
            lines.push(OrderLine::from(line_row));
        }

        let payment_sql = format!(
            "INSERT INTO order_payments (order_id, amount, currency)
             VALUES ($1, $2, $3)
             RETURNING {PAYMENT_COLUMNS}"
        );
        let payment_row = sqlx::query_as::<_, OrderPaymentRow>(&payment_sql)
            .bind(row.id)
            .bind(order.totals.total)
            .bind(currency.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let payment = OrderPayment::try_from(payment_row)?;

        tx.commit().await?;

        Ok(row.into_order(lines, Some(payment)))
    }

    #[instrument(skip(self))]
    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.with_details(vec![row]).await?.pop())
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        self.with_details(rows).await
    }

    #[instrument(skip(self))]
    async fn count_for_user(&self, user_id: UserId) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn list_stale_pending(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;

        self.with_details(rows).await
    }
}
