//! Cart ownership for the current browser session.
//!
//! Anonymous visitors get an opaque guest token held in the session; the
//! external authentication provider hands over a [`CurrentUser`] through
//! [`sign_in`], which also folds the guest cart into the user's cart.

use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use thiserror::Error;
use tower_sessions::Session;
use tracing::{info, instrument};

use just_one_dollar_core::{GuestToken, GuestTokenError};

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::models::{Cart, CurrentUser, session_keys};
use crate::services::cart::{CartError, CartService};

/// Number of characters in a freshly issued guest token.
pub const GUEST_TOKEN_LENGTH: usize = 32;

/// Errors that can occur while resolving or changing the session identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// The session held a token that is no longer acceptable.
    #[error("invalid guest token: {0}")]
    InvalidToken(#[from] GuestTokenError),

    #[error("cart error: {0}")]
    Cart(#[from] CartError),
}

/// Source of the guest token for the current request.
#[async_trait]
pub trait GuestIdentityProvider: Send + Sync {
    /// The current guest token, issuing and storing a new one if needed.
    async fn get_or_create_guest_token(&self) -> Result<GuestToken, IdentityError>;

    /// The current guest token, if one was issued.
    async fn current_guest_token(&self) -> Result<Option<GuestToken>, IdentityError>;
}

/// Guest identity backed by the tower-sessions session.
///
/// The session cookie carries the expiry, so the token lives exactly as long
/// as the session does.
#[derive(Clone)]
pub struct SessionGuestIdentity {
    session: Session,
}

impl SessionGuestIdentity {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl GuestIdentityProvider for SessionGuestIdentity {
    async fn get_or_create_guest_token(&self) -> Result<GuestToken, IdentityError> {
        if let Some(token) = self.current_guest_token().await? {
            return Ok(token);
        }

        let token = generate_guest_token()?;
        self.session
            .insert(session_keys::GUEST_TOKEN, &token)
            .await?;
        Ok(token)
    }

    async fn current_guest_token(&self) -> Result<Option<GuestToken>, IdentityError> {
        let raw: Option<String> = self.session.get(session_keys::GUEST_TOKEN).await?;
        Ok(raw.as_deref().map(GuestToken::parse).transpose()?)
    }
}

/// Issue a new random guest token.
///
/// # Errors
///
/// Never fails in practice; the generated alphabet is always accepted.
pub fn generate_guest_token() -> Result<GuestToken, GuestTokenError> {
    let raw: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GUEST_TOKEN_LENGTH)
        .map(char::from)
        .collect();
    GuestToken::parse(&raw)
}

/// Record a signed-in user in the session and adopt their guest cart.
///
/// The session id is rotated on sign-in. The guest token stays in the
/// session, so a second sign-in from the same browser re-runs the merge,
/// which is a no-op once the guest cart is inactive.
///
/// # Errors
///
/// Returns an error if the session cannot be written or the merge fails.
#[instrument(skip(session, carts), fields(user_id = %user.id))]
pub async fn sign_in(
    session: &Session,
    user: &CurrentUser,
    carts: &CartService,
) -> Result<Cart, IdentityError> {
    session.cycle_id().await?;
    session.insert(session_keys::CURRENT_USER, user).await?;
    set_sentry_user(&user.id, Some(user.email.as_str()));

    let guest = SessionGuestIdentity::new(session.clone())
        .current_guest_token()
        .await?;

    let cart = match guest {
        Some(token) => carts.merge_guest_cart_into_user(&token, user.id).await?,
        None => carts.get_or_create_cart(&user.id.into()).await?,
    };

    info!(cart_id = %cart.id, "User signed in");
    Ok(cart)
}

/// Forget the signed-in user. The guest token is kept.
///
/// # Errors
///
/// Returns an error if the session cannot be written.
pub async fn sign_out(session: &Session) -> Result<(), IdentityError> {
    session
        .remove::<CurrentUser>(session_keys::CURRENT_USER)
        .await?;
    clear_sentry_user();
    Ok(())
}
