//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                 - Liveness
//! GET    /health/ready           - Database readiness
//!
//! # Cart (user or guest)
//! GET    /cart                   - Current cart
//! POST   /cart/items             - Add item {product_id, quantity}
//! PATCH  /cart/items/{id}        - Set quantity {quantity}, <= 0 removes
//! DELETE /cart/items/{id}        - Remove item
//! GET    /cart/count             - Item count
//!
//! # Checkout (requires sign-in)
//! GET    /checkout               - Cart, addresses and totals
//! POST   /checkout               - Place order, returns payment redirect
//! GET    /checkout/success       - ?orderNumber= confirmation
//!
//! # Account (requires sign-in)
//! GET    /account/orders         - ?page=&per_page= order history
//!
//! # Webhooks
//! POST   /api/stripe/webhook     - Payment settlement
//! ```

pub mod account;
pub mod cart;
pub mod checkout;
pub mod webhooks;

use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{get, patch, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_sessions::service::SignedCookie;
use tower_sessions::{SessionManagerLayer, SessionStore};

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{id}",
            patch(cart::update_item).delete(cart::remove_item),
        )
        .route("/count", get(cart::count))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(checkout::show).post(checkout::place_order))
        .route("/success", get(checkout::success))
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    Router::new().route("/orders", get(account::orders))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
        .nest("/account", account_routes())
        .route("/api/stripe/webhook", post(webhooks::stripe))
}

/// Assemble the application: routes, sessions, request ids and tracing.
///
/// Sentry layers are added by the binary, outside of this.
pub fn build_router<S>(
    state: AppState,
    session_layer: SessionManagerLayer<S, SignedCookie>,
) -> Router
where
    S: SessionStore + Clone,
{
    with_middleware(routes(), state, session_layer)
}

/// Wrap `router` in the storefront middleware stack and attach `state`.
pub fn with_middleware<S>(
    router: Router<AppState>,
    state: AppState,
    session_layer: SessionManagerLayer<S, SignedCookie>,
) -> Router
where
    S: SessionStore + Clone,
{
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                    )
                }))
                .layer(from_fn(request_id_middleware))
                .layer(session_layer),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::OK;
    };
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
