//! Stripe Checkout Sessions client.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

use just_one_dollar_core::{CurrencyCode, to_minor_units};

use super::{CheckoutSession, CheckoutSessionRequest, GatewayError, PaymentGateway};
use crate::config::StripeConfig;

/// Client for the Stripe Checkout Sessions API.
#[derive(Clone)]
pub struct StripeGateway {
    inner: Arc<StripeGatewayInner>,
}

struct StripeGatewayInner {
    client: reqwest::Client,
    endpoint: String,
    secret_key: SecretString,
    currency: CurrencyCode,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("JustOneDollar/1.0")
            .build()?;

        Ok(Self {
            inner: Arc::new(StripeGatewayInner {
                client,
                endpoint: format!("{}/v1/checkout/sessions", config.api_base),
                secret_key: config.secret_key.clone(),
                currency: config.currency,
            }),
        })
    }

    /// Form parameters for `POST /v1/checkout/sessions`.
    fn session_params(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<Vec<(String, String)>, GatewayError> {
        let order_id = request.order_id.to_string();
        let mut params = vec![
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url()?),
            ("cancel_url".to_string(), request.cancel_url()?),
            (
                "customer_email".to_string(),
                request.customer_email.to_string(),
            ),
        ];

        let mut charged = 0_i64;
        for (i, line) in request.lines.iter().enumerate() {
            let unit_amount = to_minor_units(line.unit_price)?;
            charged += unit_amount * i64::from(line.quantity);

            let prefix = format!("line_items[{i}]");
            params.extend([
                (
                    format!("{prefix}[price_data][currency]"),
                    self.inner.currency.as_str().to_string(),
                ),
                (
                    format!("{prefix}[price_data][product_data][name]"),
                    line.name.clone(),
                ),
                (
                    format!("{prefix}[price_data][unit_amount]"),
                    unit_amount.to_string(),
                ),
                (format!("{prefix}[quantity]"), line.quantity.to_string()),
            ]);
        }

        let total = to_minor_units(request.total)?;
        if charged != total {
            warn!(charged, total, "Session lines do not add up to order total");
        }

        for scope in ["metadata", "payment_intent_data[metadata]"] {
            params.push((format!("{scope}[orderId]"), order_id.clone()));
            params.push((format!("{scope}[orderNumber]"), request.order_number.clone()));
        }

        Ok(params)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let params = self.session_params(request)?;

        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .header("Idempotency-Key", format!("order-{}-session", request.order_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| body.chars().take(200).collect());
            error!(status = %status, message = %message, "Stripe rejected checkout session");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session: SessionResponse = serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, "Failed to parse Stripe session response");
            GatewayError::MissingSessionField("id")
        })?;
        let session_id = session
            .id
            .filter(|id| !id.is_empty())
            .ok_or(GatewayError::MissingSessionField("id"))?;
        let redirect_url = session
            .url
            .filter(|url| !url.is_empty())
            .ok_or(GatewayError::MissingSessionField("url"))?;

        debug!(session_id = %session_id, "Created checkout session");
        Ok(CheckoutSession {
            session_id,
            redirect_url,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use just_one_dollar_core::{Email, OrderId};

    use super::*;
    use crate::services::payment::SessionLine;

    fn gateway(server: &MockServer) -> StripeGateway {
        StripeGateway::new(&StripeConfig {
            secret_key: SecretString::from("sk_test_key".to_string()),
            webhook_secret: SecretString::from("whsec_test".to_string()),
            api_base: server.uri(),
            currency: CurrencyCode::Usd,
            timeout: Duration::from_millis(500),
            webhook_tolerance_secs: 300,
        })
        .unwrap()
    }

    fn request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            order_id: OrderId::new(17),
            order_number: "ORD-K2J9X1-AB12".to_string(),
            lines: vec![
                SessionLine {
                    name: "Tee".to_string(),
                    quantity: 2,
                    unit_price: Decimal::new(1234, 2),
                },
                SessionLine {
                    name: "Sales tax".to_string(),
                    quantity: 1,
                    unit_price: Decimal::new(197, 2),
                },
            ],
            total: Decimal::new(2665, 2),
            customer_email: Email::parse("shopper@example.com").unwrap(),
            return_base_url: "https://shop.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_session_sends_minor_units_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_key"))
            .and(header("idempotency-key", "order-17-session"))
            .and(body_string_contains("line_items%5B0%5D%5Bprice_data%5D%5Bunit_amount%5D=1234"))
            .and(body_string_contains("line_items%5B0%5D%5Bquantity%5D=2"))
            .and(body_string_contains("line_items%5B1%5D%5Bprice_data%5D%5Bunit_amount%5D=197"))
            .and(body_string_contains("metadata%5BorderId%5D=17"))
            .and(body_string_contains(
                "payment_intent_data%5Bmetadata%5D%5BorderNumber%5D=ORD-K2J9X1-AB12",
            ))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_123",
                "url": "https://checkout.stripe.com/c/pay/cs_test_123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server)
            .create_checkout_session(&request())
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_test_123");
        assert_eq!(
            session.redirect_url,
            "https://checkout.stripe.com/c/pay/cs_test_123"
        );
    }

    #[tokio::test]
    async fn test_rejection_surfaces_gateway_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Invalid currency" }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .create_checkout_session(&request())
            .await
            .unwrap_err();

        match err {
            GatewayError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid currency");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "cs_1" })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server)
            .create_checkout_session(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::MissingSessionField("url")));
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({ "id": "cs_1", "url": "https://x" })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server)
            .create_checkout_session(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout));
    }
}
