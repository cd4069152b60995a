//! Orders, their line snapshots and payment records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use just_one_dollar_core::{
    AddressId, CurrencyCode, OrderId, OrderLineId, OrderPaymentId, OrderStatus, PaymentStatus,
    ProductId, UserId,
};

/// Money totals of an order, in major units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// An immutable order record. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub billing_address_id: AddressId,
    pub shipping_address_id: AddressId,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
    pub payment: Option<OrderPayment>,
}

/// Snapshot of a cart line at order time.
///
/// `name`, `sku` and `unit_price` are copied, not joined, so the order stays
/// accurate after the product changes or disappears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: Option<ProductId>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub name: String,
    pub sku: String,
}

/// Payment tracking record, 1:1 with an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayment {
    pub id: OrderPaymentId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub gateway_session_id: Option<String>,
    pub gateway_payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
}

/// Input for persisting a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: UserId,
    pub billing_address_id: AddressId,
    pub shipping_address_id: AddressId,
    pub totals: OrderTotals,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub name: String,
    pub sku: String,
}

/// Gateway facts recorded when a payment settles.
///
/// Settling always moves the payment to [`PaymentStatus::Completed`]; absent
/// fields keep whatever the record already holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettlementUpdate {
    pub payment_intent_id: Option<String>,
    pub payment_method: Option<String>,
}

/// What a settle call did to the stored payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleResult {
    /// This call moved the payment and its order to completed.
    Applied { order_id: OrderId },
    /// The payment was already completed; nothing changed.
    AlreadySettled { order_id: OrderId },
    /// No payment carries this gateway session id.
    UnknownSession,
}

/// One page of a user's order history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total_count: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub per_page: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl OrderPage {
    #[must_use]
    pub fn new(orders: Vec<Order>, total_count: i64, current_page: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        let total_pages = (total_count + per_page - 1) / per_page;
        Self {
            orders,
            total_count,
            total_pages,
            current_page,
            per_page,
            has_next: current_page < total_pages,
            has_previous: current_page > 1,
        }
    }
}
