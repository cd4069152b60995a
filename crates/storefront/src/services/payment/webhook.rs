//! Webhook verification and event parsing.
//!
//! The gateway signs each delivery with a `Stripe-Signature` header of the
//! form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The MAC is HMAC-SHA256
//! over `"{t}." + raw body`, keyed by the endpoint's webhook secret. Several
//! `v1` entries appear while a secret is being rolled.

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use just_one_dollar_core::{OrderId, PaymentStatus};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Event type the reconciler settles on.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Reasons a delivery's signature is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    Mismatch,
}

/// A verified event that lacks the data settlement needs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed event: {0}")]
pub struct MalformedEventError(pub String);

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Malformed(#[from] MalformedEventError),
}

/// A verified gateway event.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// Settlement facts carried by a completed checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub session_id: String,
    pub order_id: OrderId,
    pub order_number: String,
    pub payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    /// Amount charged, in minor units.
    pub amount_total: Option<i64>,
}

/// Verifies signed webhook deliveries.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    #[must_use]
    pub const fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verify a delivery against the current time and parse its event.
    ///
    /// `payload` must be the raw request body, byte for byte.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Signature` if the header is absent, malformed,
    /// stale or does not match, and `WebhookError::Malformed` if the
    /// verified body is not an event.
    pub fn verify(
        &self,
        payload: &[u8],
        header: Option<&str>,
    ) -> Result<GatewayEvent, WebhookError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// [`Self::verify`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::verify`].
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<GatewayEvent, WebhookError> {
        let header = header.ok_or(SignatureError::MissingHeader)?;
        let (timestamp, candidates) = parse_header(header)?;

        if now.abs_diff(timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::StaleTimestamp.into());
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = candidates.iter().any(|candidate| {
            hex::decode(candidate).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
        });
        if !matched {
            return Err(SignatureError::Mismatch.into());
        }

        debug!("Webhook signature verified");

        serde_json::from_slice(payload)
            .map_err(|e| MalformedEventError(format!("invalid event body: {e}")).into())
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::Mismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build a valid signature header for `payload`.
    ///
    /// Used to replay captured deliveries against a local endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot key the MAC.
    pub fn signature_header(&self, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                );
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(t) if !signatures.is_empty() => Ok((t, signatures)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Extract settlement facts from a `checkout.session.completed` event.
///
/// # Errors
///
/// Returns `MalformedEventError` if the session id or the order metadata is
/// missing or unreadable.
pub fn parse_completed_session(event: &GatewayEvent) -> Result<CompletedSession, MalformedEventError> {
    let object = &event.data.object;
    let malformed = |what: &str| MalformedEventError(format!("{what} ({})", event.id));

    let session_id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("missing session id"))?
        .to_string();

    let metadata = object.get("metadata");
    let order_id = metadata
        .and_then(|m| m.get("orderId"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing orderId metadata"))?
        .parse::<OrderId>()
        .map_err(|_| malformed("invalid orderId metadata"))?;
    let order_number = metadata
        .and_then(|m| m.get("orderNumber"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed("missing orderNumber metadata"))?
        .to_string();

    // Expanded sessions carry the whole payment intent object.
    let payment_intent_id = match object.get("payment_intent") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(intent @ Value::Object(_)) => {
            intent.get("id").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    };

    let payment_status = object
        .get("payment_status")
        .and_then(Value::as_str)
        .unwrap_or("paid")
        .parse::<PaymentStatus>()
        .map_err(|_| malformed("unknown payment_status"))?;

    let payment_method = object
        .get("payment_method_types")
        .and_then(Value::as_array)
        .and_then(|types| types.first())
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CompletedSession {
        session_id,
        order_id,
        order_number,
        payment_intent_id,
        payment_status,
        payment_method,
        amount_total: object.get("amount_total").and_then(Value::as_i64),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const NOW: i64 = 1_767_225_600;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::from("whsec_test_secret".to_string()), 300)
    }

    fn completed_event() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_123",
                "payment_status": "paid",
                "payment_method_types": ["card"],
                "amount_total": 10800,
                "metadata": { "orderId": "42", "orderNumber": "ORD-AAA-BBBB" }
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_signature_parses_event() {
        let body = completed_event();
        let header = verifier().signature_header(NOW, &body).unwrap();

        let event = verifier().verify_at(&body, Some(&header), NOW + 10).unwrap();

        assert_eq!(event.event_type, CHECKOUT_SESSION_COMPLETED);
        assert_eq!(event.id, "evt_1");
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let body = completed_event();
        let good = verifier().signature_header(NOW, &body).unwrap();
        let v1 = good.split_once("v1=").unwrap().1;
        let header = format!("t={NOW},v1={},v1={v1}", "00".repeat(32));

        assert!(verifier().verify_at(&body, Some(&header), NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let body = completed_event();
        let header = verifier().signature_header(NOW, &body).unwrap();
        let mut tampered = body.clone();
        tampered.push(b' ');

        assert!(matches!(
            verifier().verify_at(&tampered, Some(&header), NOW),
            Err(WebhookError::Signature(SignatureError::Mismatch))
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let body = completed_event();
        let other = WebhookVerifier::new(SecretString::from("whsec_other".to_string()), 300);
        let header = other.signature_header(NOW, &body).unwrap();

        assert!(matches!(
            verifier().verify_at(&body, Some(&header), NOW),
            Err(WebhookError::Signature(SignatureError::Mismatch))
        ));
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let body = completed_event();
        let header = verifier().signature_header(NOW - 301, &body).unwrap();

        assert!(matches!(
            verifier().verify_at(&body, Some(&header), NOW),
            Err(WebhookError::Signature(SignatureError::StaleTimestamp))
        ));
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let body = completed_event();

        for header in [
            format!("t={},v1=00", i64::MIN),
            format!("t={},v1=00", i64::MAX),
        ] {
            assert!(matches!(
                verifier().verify_at(&body, Some(&header), NOW),
                Err(WebhookError::Signature(SignatureError::StaleTimestamp))
            ));
        }
        let future = verifier().signature_header(NOW + 301, &body).unwrap();
        assert!(matches!(
            verifier().verify_at(&body, Some(&future), NOW),
            Err(WebhookError::Signature(SignatureError::StaleTimestamp))
        ));
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        let body = completed_event();

        assert!(matches!(
            verifier().verify_at(&body, None, NOW),
            Err(WebhookError::Signature(SignatureError::MissingHeader))
        ));
        for header in ["", "v1=abc", "t=abc,v1=abc", "t=123"] {
            assert!(
                matches!(
                    verifier().verify_at(&body, Some(header), NOW),
                    Err(WebhookError::Signature(SignatureError::MalformedHeader))
                ),
                "header {header:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_signed_garbage_is_malformed() {
        let body = b"not json".to_vec();
        let header = verifier().signature_header(NOW, &body).unwrap();

        assert!(matches!(
            verifier().verify_at(&body, Some(&header), NOW),
            Err(WebhookError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_completed_session() {
        let event: GatewayEvent = serde_json::from_slice(&completed_event()).unwrap();
        let session = parse_completed_session(&event).unwrap();

        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(session.order_id, OrderId::new(42));
        assert_eq!(session.order_number, "ORD-AAA-BBBB");
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(session.payment_status, PaymentStatus::Completed);
        assert_eq!(session.payment_method.as_deref(), Some("card"));
        assert_eq!(session.amount_total, Some(10800));
    }

    #[test]
    fn test_parse_expanded_payment_intent() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_2",
                "payment_intent": { "id": "pi_expanded", "object": "payment_intent" },
                "metadata": { "orderId": "1", "orderNumber": "ORD-1-AAAA" }
            }}
        }))
        .unwrap();

        let session = parse_completed_session(&event).unwrap();
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_expanded"));
        assert!(session.payment_method.is_none());
    }

    #[test]
    fn test_parse_missing_metadata_is_malformed() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "id": "evt_3",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_3", "metadata": {} } }
        }))
        .unwrap();

        let err = parse_completed_session(&event).unwrap_err();
        assert!(err.0.contains("orderId"));
    }
}
