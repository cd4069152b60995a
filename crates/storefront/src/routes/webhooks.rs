//! Payment gateway webhook.
//!
//! The gateway cannot act on error bodies, so this handler speaks only in
//! status codes:
//!
//! - `200 {"received": true}` settled, redelivered or ignored event type
//! - `400` missing or invalid signature, or an event that cannot be applied
//! - `404` no payment recorded for the session
//! - `500` storage failure while settling

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{instrument, warn};

use crate::services::SettlementOutcome;
use crate::services::payment::{SIGNATURE_HEADER, SignatureError, WebhookError};
use crate::state::AppState;

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn received() -> Response {
    (StatusCode::OK, Json(json!({ "received": true }))).into_response()
}

/// Handle a signed delivery.
///
/// The body is taken as raw bytes; the signature covers them exactly.
#[instrument(skip_all)]
pub async fn stripe(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = match state.webhook_verifier().verify(&body, signature) {
        Ok(event) => event,
        Err(WebhookError::Signature(SignatureError::MissingHeader)) => {
            warn!("Webhook without signature header");
            return error(StatusCode::BAD_REQUEST, "Missing signature");
        }
        Err(WebhookError::Signature(e)) => {
            warn!(error = %e, "Webhook signature rejected");
            return error(StatusCode::BAD_REQUEST, "Invalid signature");
        }
        Err(WebhookError::Malformed(e)) => {
            warn!(error = %e, "Signed webhook body is not an event");
            return error(StatusCode::BAD_REQUEST, "Malformed event");
        }
    };

    match state.reconciler().handle(&event).await {
        Ok(SettlementOutcome::Settled { .. } | SettlementOutcome::Ignored { .. }) => received(),
        Ok(SettlementOutcome::NotFound { .. }) => {
            error(StatusCode::NOT_FOUND, "Order payment not found")
        }
        Ok(SettlementOutcome::Malformed { .. }) => {
            error(StatusCode::BAD_REQUEST, "Malformed event")
        }
        Err(e) => {
            let event_id = sentry::capture_error(&e);
            tracing::error!(
                error = %e,
                sentry_event_id = %event_id,
                gateway_event_id = %event.id,
                "Webhook settlement failed"
            );
            error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
