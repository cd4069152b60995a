//! Hosted payment gateway.
//!
//! # Architecture
//!
//! - [`PaymentGateway`] is the seam checkout talks to; [`StripeGateway`] is
//!   the production implementation over `reqwest`
//! - Amounts cross this boundary in minor units (cents); everything on our
//!   side of it is a major-unit `Decimal`
//! - Inbound webhooks are verified by [`WebhookVerifier`] against the raw
//!   request body before any JSON parsing
//!
//! # Redirect contract
//!
//! - success: `{base}/checkout/success?orderNumber={order_number}`
//! - cancel: `{base}/checkout` (cart untouched)

mod stripe;
pub mod webhook;

pub use stripe::StripeGateway;
pub use webhook::{
    CHECKOUT_SESSION_COMPLETED, CompletedSession, GatewayEvent, MalformedEventError,
    SIGNATURE_HEADER, SignatureError, WebhookError, WebhookVerifier, parse_completed_session,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;

use just_one_dollar_core::{Email, MoneyError, OrderId};

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway request timed out")]
    Timeout,

    /// The gateway answered with a non-success status.
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A success response without the fields checkout needs.
    #[error("gateway response missing {0}")]
    MissingSessionField(&'static str),

    /// An amount could not be expressed in minor units.
    #[error("invalid amount: {0}")]
    Amount(#[from] MoneyError),

    #[error("invalid return URL: {0}")]
    InvalidReturnUrl(#[from] url::ParseError),
}

/// One line of a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLine {
    pub name: String,
    pub quantity: i32,
    /// Major-unit price of one unit.
    pub unit_price: Decimal,
}

/// Everything the gateway needs to open a hosted payment page for an order.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: OrderId,
    pub order_number: String,
    pub lines: Vec<SessionLine>,
    /// Order total; the lines must add up to it.
    pub total: Decimal,
    pub customer_email: Email,
    /// Public base URL the success and cancel URLs are built on.
    pub return_base_url: String,
}

impl CheckoutSessionRequest {
    /// Where the gateway sends the customer after paying.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse.
    pub fn success_url(&self) -> Result<String, GatewayError> {
        let mut url = Url::parse(&self.return_base_url)?.join("checkout/success")?;
        url.query_pairs_mut()
            .append_pair("orderNumber", &self.order_number);
        Ok(url.into())
    }

    /// Where the gateway sends the customer after backing out.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse.
    pub fn cancel_url(&self) -> Result<String, GatewayError> {
        Ok(Url::parse(&self.return_base_url)?.join("checkout")?.into())
    }
}

/// A created hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// Creates hosted payment sessions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session for an order.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}
