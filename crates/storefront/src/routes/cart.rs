//! Cart route handlers.
//!
//! Every handler works on the cart of the request's [`CartIdentity`]: the
//! signed-in user, or the guest token held in the session.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use just_one_dollar_core::{CartId, CartItemId, CartOwner, ProductId};

use crate::error::{AppError, Result};
use crate::middleware::{CartIdentity, OptionalAuth};
use crate::models::{Cart, CartItem};
use crate::services::checkout::PricedLine;
use crate::services::{GuestIdentityProvider, SessionGuestIdentity};
use crate::state::AppState;

/// Cart with its running totals.
///
/// The owner is reduced to a flag; guest tokens never leave the session.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub id: CartId,
    pub items: Vec<CartItem>,
    pub item_count: i64,
    pub subtotal: Decimal,
    pub signed_in: bool,
}

impl CartView {
    fn new(cart: Cart, subtotal: Decimal) -> Self {
        Self {
            id: cart.id,
            item_count: cart.item_count(),
            signed_in: !cart.owner.is_guest(),
            items: cart.items,
            subtotal,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

const fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

/// Display the current cart, creating it if needed.
#[instrument(skip(state, owner))]
pub async fn show(
    State(state): State<AppState>,
    CartIdentity(owner): CartIdentity,
) -> Result<Json<CartView>> {
    let cart = state.carts().get_or_create_cart(&owner).await?;
    let lines: Vec<PricedLine> = cart.items.iter().map(PricedLine::from).collect();

    let subtotal = state.checkout().totals_for(&lines).subtotal;

    Ok(Json(CartView::new(cart, subtotal)))
}

/// Add a product to the cart.
#[instrument(skip(state, owner))]
pub async fn add_item(
    State(state): State<AppState>,
    CartIdentity(owner): CartIdentity,
    Json(request): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartItem>)> {
    let cart = state.carts().get_or_create_cart(&owner).await?;
    let item = state
        .carts()
        .add_item(&cart, request.product_id, request.quantity)
        .await?;

    Ok((StatusCode::CREATED, Json(item)))
}

/// Set a line's quantity; zero or less removes it.
#[instrument(skip(state, owner))]
pub async fn update_item(
    State(state): State<AppState>,
    CartIdentity(owner): CartIdentity,
    Path(item_id): Path<CartItemId>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Response> {
    let cart = state
        .carts()
        .find_cart(&owner)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("cart item {item_id}")))?;

    let updated = state
        .carts()
        .update_item_quantity(&cart, item_id, request.quantity)
        .await?;

    Ok(match updated {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Remove a line. Succeeds if it is already gone.
#[instrument(skip(state, owner))]
pub async fn remove_item(
    State(state): State<AppState>,
    CartIdentity(owner): CartIdentity,
    Path(item_id): Path<CartItemId>,
) -> Result<StatusCode> {
    if let Some(cart) = state.carts().find_cart(&owner).await? {
        state.carts().remove_item(&cart, item_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Item count for the cart badge.
///
/// Does not issue a guest token; visitors without one have zero items.
#[instrument(skip_all)]
pub async fn count(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    session: Session,
) -> Result<Json<CountResponse>> {
    let owner = match user {
        Some(user) => Some(CartOwner::User(user.id)),
        None => SessionGuestIdentity::new(session)
            .current_guest_token()
            .await?
            .map(CartOwner::Guest),
    };

    let count = match owner {
        Some(owner) => state.carts().item_count(&owner).await?,
        None => 0,
    };

    Ok(Json(CountResponse { count }))
}
