//! Session middleware configuration.
//!
//! Sessions hold the signed-in user and the guest token. Production uses the
//! `PostgreSQL` store; tests pass an in-memory one.

use secrecy::ExposeSecret;
use sha2::{Digest, Sha512};
use tower_sessions::cookie::{Key, SameSite, time::Duration};
use tower_sessions::service::SignedCookie;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};

use crate::config::StorefrontConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "jod_session";

/// Create the session layer over `store`.
///
/// The cookie is signed with a key derived from the session secret and
/// expires after `GUEST_TOKEN_DAYS` without activity, which is also the
/// lifetime of a guest cart's token.
#[must_use]
pub fn create_session_layer<S>(
    store: S,
    config: &StorefrontConfig,
) -> SessionManagerLayer<S, SignedCookie>
where
    S: SessionStore + Clone,
{
    let digest = Sha512::digest(config.session_secret.expose_secret().as_bytes());
    let key = Key::from(digest.as_slice());

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::days(
            config.checkout.guest_token_days,
        )))
        .with_secure(config.is_https())
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
        .with_signed(key)
}
