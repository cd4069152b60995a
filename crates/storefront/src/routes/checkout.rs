//! Checkout route handlers.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::instrument;

use just_one_dollar_core::AddressId;

use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::models::Order;
use crate::services::checkout::{CheckoutData, PlacedOrder};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub billing_address_id: AddressId,
    pub shipping_address_id: AddressId,
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    #[serde(rename = "orderNumber")]
    pub order_number: String,
}

/// Cart, saved addresses and totals for the checkout page.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<CheckoutData>> {
    Ok(Json(state.checkout().checkout_data(user.id).await?))
}

/// Place the order and hand back the hosted payment page.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn place_order(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Json<PlacedOrder>> {
    let placed = state
        .checkout()
        .place_order(
            &user,
            request.billing_address_id,
            request.shipping_address_id,
            &state.config().base_url,
        )
        .await?;

    Ok(Json(placed))
}

/// Confirmation for an order the signed-in user placed.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn success(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<SuccessQuery>,
) -> Result<Json<Order>> {
    state
        .checkout()
        .order_for_user(&query.order_number, user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {}", query.order_number)))
}
