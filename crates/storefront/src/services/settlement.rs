//! Settlement reconciler.
//!
//! Applies verified gateway events to local order state. Every event maps to
//! a [`SettlementOutcome`]; the webhook route turns that into an HTTP status.
//!
//! Settling is idempotent: the repository only moves a payment from
//! `PENDING` to `COMPLETED`, so redelivered events report
//! `first_delivery: false` and change nothing.
//!
//! A session whose charged `amount_total` differs from the recorded payment
//! amount is reported as malformed and leaves the order pending.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use just_one_dollar_core::{OrderId, PaymentStatus, from_minor_units};

use crate::db::{OrderPaymentRepository, RepositoryError};
use crate::models::{SettleResult, SettlementUpdate};
use crate::services::payment::{
    CHECKOUT_SESSION_COMPLETED, GatewayEvent, parse_completed_session,
};

/// What a verified event did to local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The order is completed. `first_delivery` is false for redeliveries.
    Settled {
        order_id: OrderId,
        order_number: String,
        first_delivery: bool,
    },
    /// Acknowledged without any state change.
    Ignored { event_type: String },
    /// No payment is recorded for the session.
    NotFound { session_id: String },
    /// The event could not be applied as sent.
    Malformed { reason: String },
}

/// Applies gateway events to orders and payments.
#[derive(Clone)]
pub struct SettlementReconciler {
    payments: Arc<dyn OrderPaymentRepository>,
}

impl SettlementReconciler {
    #[must_use]
    pub fn new(payments: Arc<dyn OrderPaymentRepository>) -> Self {
        Self { payments }
    }

    /// Handle one verified event.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` only for storage failures; every other
    /// condition is a [`SettlementOutcome`].
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: &GatewayEvent) -> Result<SettlementOutcome, RepositoryError> {
        if event.event_type != CHECKOUT_SESSION_COMPLETED {
            info!("Ignoring gateway event");
            return Ok(SettlementOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        }

        let session = match parse_completed_session(event) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Unusable checkout session event");
                return Ok(SettlementOutcome::Malformed { reason: e.0 });
            }
        };

        let Some(payment) = self.payments.find_by_session(&session.session_id).await? else {
            error!(
                session_id = %session.session_id,
                order_number = %session.order_number,
                "Webhook references unknown checkout session"
            );
            return Ok(SettlementOutcome::NotFound {
                session_id: session.session_id,
            });
        };

        if payment.order_id != session.order_id {
            error!(
                session_id = %session.session_id,
                recorded_order_id = %payment.order_id,
                metadata_order_id = %session.order_id,
                "Webhook metadata does not match recorded order"
            );
            return Ok(SettlementOutcome::Malformed {
                reason: "order metadata does not match session".to_string(),
            });
        }

        let Some(charged) = session.amount_total.map(from_minor_units) else {
            warn!(session_id = %session.session_id, "Checkout session has no amount_total");
            return Ok(SettlementOutcome::Malformed {
                reason: "session has no amount_total".to_string(),
            });
        };
        if charged != payment.amount {
            error!(
                session_id = %session.session_id,
                order_id = %payment.order_id,
                %charged,
                expected = %payment.amount,
                "Webhook amount does not match order total"
            );
            return Ok(SettlementOutcome::Malformed {
                reason: format!("charged {charged}, order total is {}", payment.amount),
            });
        }

        if session.payment_status == PaymentStatus::Pending {
            warn!(
                session_id = %session.session_id,
                "Gateway reports session unpaid; completing order anyway"
            );
        }

        let update = SettlementUpdate {
            payment_intent_id: session.payment_intent_id,
            payment_method: session.payment_method,
        };

        let outcome = match self.payments.settle(&session.session_id, &update).await? {
            SettleResult::Applied { order_id } => {
                info!(order_id = %order_id, order_number = %session.order_number, "Order settled");
                SettlementOutcome::Settled {
                    order_id,
                    order_number: session.order_number,
                    first_delivery: true,
                }
            }
            SettleResult::AlreadySettled { order_id } => {
                info!(order_id = %order_id, "Duplicate settlement delivery");
                SettlementOutcome::Settled {
                    order_id,
                    order_number: session.order_number,
                    first_delivery: false,
                }
            }
            SettleResult::UnknownSession => {
                error!(session_id = %session.session_id, "Checkout session vanished during settlement");
                SettlementOutcome::NotFound {
                    session_id: session.session_id,
                }
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use just_one_dollar_core::{AddressId, CurrencyCode, OrderStatus, ProductId, UserId};

    use super::*;
    use crate::db::OrderRepository;
    use crate::db::memory::MemoryStore;
    use crate::models::{NewOrder, NewOrderLine, OrderTotals};

    async fn pending_order(store: &MemoryStore, session_id: &str) -> OrderId {
        let order = store
            .create_with_payment(
                &NewOrder {
                    order_number: "ORD-TEST-0001".to_string(),
                    user_id: UserId::new(1),
                    billing_address_id: AddressId::new(1),
                    shipping_address_id: AddressId::new(1),
                    totals: OrderTotals {
                        subtotal: Decimal::from(100),
                        tax: Decimal::from(8),
                        total: Decimal::from(108),
                    },
                    lines: vec![NewOrderLine {
                        product_id: ProductId::new(1),
                        quantity: 1,
                        unit_price: Decimal::from(100),
                        name: "Widget".to_string(),
                        sku: "W-1".to_string(),
                    }],
                },
                CurrencyCode::Usd,
            )
            .await
            .unwrap();
        store.attach_session(order.id, session_id).await.unwrap();
        order.id
    }

    fn completed(session_id: &str, order_id: OrderId) -> GatewayEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": session_id,
                "payment_intent": "pi_1",
                "payment_status": "paid",
                "payment_method_types": ["card"],
                "amount_total": 10800,
                "metadata": { "orderId": order_id.to_string(), "orderNumber": "ORD-TEST-0001" }
            }}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_settles_once_and_acknowledges_redelivery() {
        let store = Arc::new(MemoryStore::new());
        let order_id = pending_order(&store, "cs_1").await;
        let reconciler = SettlementReconciler::new(store.clone());
        let event = completed("cs_1", order_id);

        let first = reconciler.handle(&event).await.unwrap();
        let second = reconciler.handle(&event).await.unwrap();

        assert!(matches!(first, SettlementOutcome::Settled { first_delivery: true, .. }));
        assert!(matches!(second, SettlementOutcome::Settled { first_delivery: false, .. }));

        let order = store.find_by_number("ORD-TEST-0001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        let payment = order.payment.unwrap();
        assert_eq!(payment.payment_status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(payment.payment_method.as_deref(), Some("card"));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = SettlementReconciler::new(store.clone());

        let outcome = reconciler.handle(&completed("cs_missing", OrderId::new(1))).await.unwrap();

        assert_eq!(
            outcome,
            SettlementOutcome::NotFound {
                session_id: "cs_missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_other_event_types_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let order_id = pending_order(&store, "cs_1").await;
        let reconciler = SettlementReconciler::new(store.clone());
        let mut event = completed("cs_1", order_id);
        event.event_type = "checkout.session.expired".to_string();

        let outcome = reconciler.handle(&event).await.unwrap();

        assert!(matches!(outcome, SettlementOutcome::Ignored { .. }));
        let order = store.find_by_number("ORD-TEST-0001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_metadata_mismatch_is_malformed() {
        let store = Arc::new(MemoryStore::new());
        let order_id = pending_order(&store, "cs_1").await;
        let reconciler = SettlementReconciler::new(store.clone());
        let event = completed("cs_1", OrderId::new(order_id.as_i32() + 100));

        let outcome = reconciler.handle(&event).await.unwrap();

        assert!(matches!(outcome, SettlementOutcome::Malformed { .. }));
        let order = store.find_by_number("ORD-TEST-0001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_amount_mismatch_leaves_order_pending() {
        let store = Arc::new(MemoryStore::new());
        let order_id = pending_order(&store, "cs_1").await;
        let reconciler = SettlementReconciler::new(store.clone());

        let mut underpaid = completed("cs_1", order_id);
        underpaid.data.object["amount_total"] = json!(100);
        let mut unpriced = completed("cs_1", order_id);
        unpriced.data.object.as_object_mut().unwrap().remove("amount_total");

        for event in [underpaid, unpriced] {
            let outcome = reconciler.handle(&event).await.unwrap();
            assert!(matches!(outcome, SettlementOutcome::Malformed { .. }));
        }
        let order = store.find_by_number("ORD-TEST-0001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment.unwrap().payment_status, PaymentStatus::Pending);
    }
}
