//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL, used for payment success/cancel redirects
//! - `STOREFRONT_SESSION_SECRET` - Session signing secret (min 32 chars, high entropy)
//! - `STRIPE_SECRET_KEY` - Payment gateway API key
//! - `STRIPE_WEBHOOK_SECRET` - Shared secret for webhook signatures
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STRIPE_API_BASE` - Gateway API base URL (default: <https://api.stripe.com>)
//! - `STRIPE_CURRENCY` - Charge currency (default: usd)
//! - `STRIPE_TIMEOUT_SECS` - Gateway request timeout (default: 15)
//! - `STRIPE_WEBHOOK_TOLERANCE_SECS` - Accepted webhook clock skew (default: 300)
//! - `CHECKOUT_TAX_RATE` - Flat tax rate as a decimal fraction (default: 0.08)
//! - `GUEST_TOKEN_DAYS` - Guest session lifetime since last activity (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use just_one_dollar_core::CurrencyCode;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront, without trailing slash
    pub base_url: String,
    /// Session signing secret
    pub session_secret: SecretString,
    pub stripe: StripeConfig,
    pub checkout: CheckoutConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub api_base: String,
    pub currency: CurrencyCode,
    /// Timeout for each outbound gateway request
    pub timeout: Duration,
    /// Maximum age of a webhook signature timestamp, in seconds
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}

/// Checkout pricing and identity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Flat tax rate applied to the subtotal
    pub tax_rate: Decimal,
    /// Guest session lifetime since last activity, in days
    pub guest_token_days: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(8, 2),
            guest_token_days: 30,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_parsed_or_default::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = get_parsed_or_default::<u16>("STOREFRONT_PORT", "3000")?;
        let base_url = normalize_base_url(
            "STOREFRONT_BASE_URL",
            &get_required_env("STOREFRONT_BASE_URL")?,
        )?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            stripe: StripeConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies should carry the `Secure` flag.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs = get_parsed_or_default::<u64>("STRIPE_TIMEOUT_SECS", "15")?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "STRIPE_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base: normalize_base_url(
                "STRIPE_API_BASE",
                &get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com"),
            )?,
            currency: get_parsed_or_default::<CurrencyCode>("STRIPE_CURRENCY", "usd")?,
            timeout: Duration::from_secs(timeout_secs),
            webhook_tolerance_secs: get_parsed_or_default::<i64>(
                "STRIPE_WEBHOOK_TOLERANCE_SECS",
                "300",
            )?,
        })
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let tax_rate = get_parsed_or_default::<Decimal>("CHECKOUT_TAX_RATE", "0.08")?;
        if tax_rate.is_sign_negative() || tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_TAX_RATE".to_string(),
                format!("must be in [0, 1), got {tax_rate}"),
            ));
        }

        let guest_token_days = get_parsed_or_default::<i64>("GUEST_TOKEN_DAYS", "30")?;
        if guest_token_days < 1 {
            return Err(ConfigError::InvalidEnvVar(
                "GUEST_TOKEN_DAYS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            tax_rate,
            guest_token_days,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    // Try primary key first (e.g., STOREFRONT_DATABASE_URL)
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    // Fallback to generic DATABASE_URL (set by Fly.io postgres attach)
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn get_parsed_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate an absolute http(s) URL and strip any trailing slash.
fn normalize_base_url(key: &str, value: &str) -> Result<String, ConfigError> {
    let url = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an http(s) URL".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
