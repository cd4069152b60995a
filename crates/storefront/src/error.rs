//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Server-class errors are
//! captured to Sentry before responding; clients get a JSON body of the form
//! `{"error": "<message>"}` that never carries internal details.
//!
//! The webhook endpoint does not use this type; see `routes::webhooks`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{CartError, CheckoutError, IdentityError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Session or guest identity could not be resolved.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

const INTERNAL_MESSAGE: &str = "Internal server error";
const GATEWAY_MESSAGE: &str = "Payment provider error";

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Database(_) | Self::Identity(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
            Self::Cart(err) => match err {
                CartError::InvalidQuantity(_) | CartError::QuantityLimit { .. } => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                CartError::ProductNotFound(_) | CartError::ItemNotFound(_) => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                CartError::ProductUnavailable(_) | CartError::CartInactive(_) => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                CartError::Repository(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
                }
            },
            Self::Checkout(err) => match err {
                CheckoutError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
                CheckoutError::Gateway(_) => (StatusCode::BAD_GATEWAY, GATEWAY_MESSAGE.to_string()),
                CheckoutError::Cart(CartError::CartInactive(_)) => {
                    (StatusCode::CONFLICT, err.to_string())
                }
                CheckoutError::OrderNumberExhausted { .. }
                | CheckoutError::Cart(_)
                | CheckoutError::Repository(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
                }
            },
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        // Capture server errors (including 502) to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Associate subsequent Sentry events with a user.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Stop associating Sentry events with the signed-out user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
mod tests {
    use just_one_dollar_core::{CartItemId, ProductId};

    use super::*;
    use crate::services::checkout::{AddressRole, ValidationError};
    use crate::services::payment::GatewayError;

    fn status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order ORD-1".to_string());
        assert_eq!(err.to_string(), "Not found: order ORD-1");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status(AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(AppError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AppError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(AppError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(CartError::InvalidQuantity(0).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(CartError::QuantityLimit { max: 999 }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(CartError::ProductNotFound(ProductId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(CartError::ItemNotFound(CartItemId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_checkout_errors() {
        let validation = AppError::from(CheckoutError::from(ValidationError::InvalidAddress(
            AddressRole::Shipping,
        )));
        let (code, message) = validation.status_and_message();
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(message, "Please choose a valid shipping address");

        let gateway = AppError::from(CheckoutError::from(GatewayError::Timeout));
        let (code, message) = gateway.status_and_message();
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert_eq!(message, GATEWAY_MESSAGE);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::Database(RepositoryError::DataCorruption("bad row 7".into()));
        let (_, message) = err.status_and_message();
        assert_eq!(message, INTERNAL_MESSAGE);
    }
}
