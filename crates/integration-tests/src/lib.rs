//! Integration test harness for Just One Dollar.
//!
//! Everything runs in process: the in-memory store stands in for
//! `PostgreSQL`, [`FakeGateway`] for Stripe, and requests go straight into
//! the axum router with `tower::ServiceExt::oneshot`.
//!
//! ```bash
//! cargo test -p just-one-dollar-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    routing::post,
};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::{MemoryStore as SessionMemoryStore, Session};

use just_one_dollar_core::{CurrencyCode, Email, UserId};
use just_one_dollar_storefront::config::{CheckoutConfig, StorefrontConfig, StripeConfig};
use just_one_dollar_storefront::db::Repositories;
use just_one_dollar_storefront::db::memory::MemoryStore;
use just_one_dollar_storefront::middleware::create_session_layer;
use just_one_dollar_storefront::models::CurrentUser;
use just_one_dollar_storefront::routes::{routes, with_middleware};
use just_one_dollar_storefront::services::payment::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, PaymentGateway,
};
use just_one_dollar_storefront::services::sign_in;
use just_one_dollar_storefront::state::AppState;

/// Base URL the success and cancel URLs are built on.
pub const BASE_URL: &str = "http://localhost:3000";

/// Configuration for in-process tests. Nothing here is contacted.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused".to_string()),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        base_url: BASE_URL.to_string(),
        session_secret: SecretString::from("integration-test-session-secret-0123456789".to_string()),
        stripe: StripeConfig {
            secret_key: SecretString::from("sk_test_integration".to_string()),
            webhook_secret: SecretString::from("whsec_integration".to_string()),
            api_base: "http://127.0.0.1:9".to_string(),
            currency: CurrencyCode::Usd,
            timeout: Duration::from_secs(1),
            webhook_tolerance_secs: 300,
        },
        checkout: CheckoutConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// Payment gateway double that records requests and hands out session ids.
#[derive(Default)]
pub struct FakeGateway {
    fail: Mutex<bool>,
    requests: Mutex<Vec<CheckoutSessionRequest>>,
}

impl FakeGateway {
    /// Make subsequent session requests fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(GatewayError::Rejected {
                status: 503,
                message: "gateway unavailable".to_string(),
            });
        }
        Ok(CheckoutSession {
            session_id: format!("cs_test_{}", request.order_id),
            redirect_url: format!("https://checkout.example.com/pay/{}", request.order_number),
        })
    }
}

/// A fully wired storefront over in-memory collaborators.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
    pub router: Router,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        let config = test_config();
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::from_parts(
            config.clone(),
            &Repositories::memory(&store),
            gateway.clone(),
            None,
        );

        // Stand-in for the external authentication provider.
        let app = routes().route("/test/sign-in", post(test_sign_in));
        let session_layer = create_session_layer(SessionMemoryStore::default(), &config);
        let router = with_middleware(app, state.clone(), session_layer);

        Self {
            store,
            gateway,
            state,
            router,
        }
    }

    /// A browser talking to this context, with its own cookie jar.
    #[must_use]
    pub fn browser(&self) -> Browser {
        Browser {
            router: self.router.clone(),
            cookie: None,
        }
    }

    /// Deliver a webhook body signed with the configured secret.
    pub async fn deliver_webhook(&self, payload: &Value) -> (StatusCode, Value) {
        let body = serde_json::to_vec(payload).unwrap();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self
            .state
            .webhook_verifier()
            .signature_header(timestamp, &body)
            .unwrap();
        self.post_webhook(body, Some(&signature)).await
    }

    /// Deliver a raw webhook body with an arbitrary signature header.
    pub async fn post_webhook(&self, body: Vec<u8>, signature: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::post("/api/stripe/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            request = request.header("Stripe-Signature", signature);
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        read_json(response).await
    }
}

async fn test_sign_in(
    State(state): State<AppState>,
    session: Session,
    Json(user): Json<CurrentUser>,
) -> StatusCode {
    match sign_in(&session, &user, state.carts()).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A client that carries the session cookie between requests.
pub struct Browser {
    router: Router,
    cookie: Option<String>,
}

impl Browser {
    pub async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body)).await
    }

    pub async fn patch(&mut self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("PATCH", uri, Some(body)).await
    }

    pub async fn delete(&mut self, uri: &str) -> (StatusCode, Value) {
        self.send("DELETE", uri, None).await
    }

    /// Sign in as `user` through the stand-in auth route.
    pub async fn sign_in(&mut self, id: i32, email: &str) -> CurrentUser {
        let user = CurrentUser {
            id: UserId::new(id),
            email: Email::parse(email).unwrap(),
        };
        let (status, _) = self
            .post("/test/sign-in", serde_json::to_value(&user).unwrap())
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        user
    }

    async fn send(&mut self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }

        read_json(response).await
    }
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Parse a decimal the way the API serializes it (as a string).
#[must_use]
pub fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

/// A `checkout.session.completed` event for a session created by
/// [`FakeGateway`], charging `amount_total` minor units.
#[must_use]
pub fn completed_session_event(
    session_id: &str,
    order_id: &str,
    order_number: &str,
    amount_total: i64,
) -> Value {
    serde_json::json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "object": "checkout.session",
            "payment_intent": format!("pi_{order_id}"),
            "payment_status": "paid",
            "payment_method_types": ["card"],
            "amount_total": amount_total,
            "metadata": { "orderId": order_id, "orderNumber": order_number }
        }}
    })
}
