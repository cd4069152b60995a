//! Order payment repository.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use just_one_dollar_core::{OrderId, PaymentStatus};

use super::orders::{OrderPaymentRow, PAYMENT_COLUMNS};
use crate::db::{OrderPaymentRepository, RepositoryError, map_unique_violation};
use crate::models::{OrderPayment, SettleResult, SettlementUpdate};

/// Payment repository backed by the `order_payments` table.
#[derive(Clone)]
pub struct PgOrderPaymentRepository {
    pool: PgPool,
}

impl PgOrderPaymentRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderPaymentRepository for PgOrderPaymentRepository {
    #[instrument(skip(self))]
    async fn attach_session(
        &self,
        order_id: OrderId,
        session_id: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE order_payments
            SET gateway_session_id = $2, updated_at = now()
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "gateway session"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderPayment>, RepositoryError> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM order_payments WHERE gateway_session_id = $1");
        let row = sqlx::query_as::<_, OrderPaymentRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OrderPayment::try_from).transpose()
    }

    #[instrument(skip(self, update))]
    async fn settle(
        &self,
        session_id: &str,
        update: &SettlementUpdate,
    ) -> Result<SettleResult, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes a concurrent duplicate wait on the row lock
        // and then match nothing.
        let settled: Option<OrderId> = sqlx::query_scalar(
            r"
            UPDATE order_payments
            SET gateway_payment_intent_id = COALESCE($2, gateway_payment_intent_id),
                payment_method = COALESCE($3, payment_method),
                payment_status = $4,
                updated_at = now()
            WHERE gateway_session_id = $1 AND payment_status <> $4
            RETURNING order_id
            ",
        )
        .bind(session_id)
        .bind(update.payment_intent_id.as_deref())
        .bind(update.payment_method.as_deref())
        .bind(PaymentStatus::Completed)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(order_id) = settled {
            sqlx::query(
                r"
                UPDATE orders
                SET status = 'completed', updated_at = now()
                WHERE id = $1 AND status <> 'completed'
                ",
            )
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(SettleResult::Applied { order_id });
        }

        let existing: Option<OrderId> =
            sqlx::query_scalar("SELECT order_id FROM order_payments WHERE gateway_session_id = $1")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(existing.map_or(SettleResult::UnknownSession, |order_id| {
            SettleResult::AlreadySettled { order_id }
        }))
    }
}
