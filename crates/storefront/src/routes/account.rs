//! Account route handlers.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::OrderPage;
use crate::state::AppState;

/// Orders per page unless the client asks otherwise.
const DEFAULT_PER_PAGE: i64 = 20;

/// Query parameters for the order history.
#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

const fn default_page() -> i64 {
    1
}

const fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

/// The signed-in user's orders, newest first.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn orders(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<OrderPage>> {
    let page = state
        .checkout()
        .orders_for_user(user.id, query.page, query.per_page)
        .await?;
    Ok(Json(page))
}
