//! Identity extractors.
//!
//! Authentication itself happens elsewhere; these only read what
//! [`crate::services::sign_in`] left in the session.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tower_sessions::Session;

use just_one_dollar_core::CartOwner;

use crate::error::AppError;
use crate::models::{CurrentUser, session_keys};
use crate::services::{GuestIdentityProvider, SessionGuestIdentity};

/// Extractor that requires a signed-in user.
///
/// # Example
///
/// ```rust,ignore
/// async fn orders(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     format!("Orders for {}", user.email)
/// }
/// ```
pub struct RequireAuth(pub CurrentUser);

/// Rejection for [`RequireAuth`].
#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Sign in required" })),
        )
            .into_response()
    }
}

async fn current_user(parts: &Parts) -> Option<CurrentUser> {
    let session = parts.extensions.get::<Session>()?;
    session
        .get::<CurrentUser>(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        current_user(parts).await.map(Self).ok_or(AuthRejection)
    }
}

/// Extractor that optionally gets the signed-in user.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(current_user(parts).await))
    }
}

/// The owner whose cart this request works on.
///
/// The signed-in user if there is one, otherwise the session's guest token,
/// issued on first use.
pub struct CartIdentity(pub CartOwner);

impl<S> FromRequestParts<S> for CartIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = current_user(parts).await {
            return Ok(Self(CartOwner::User(user.id)));
        }

        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("session layer missing".to_string()))?;
        let token = SessionGuestIdentity::new(session)
            .get_or_create_guest_token()
            .await?;

        Ok(Self(CartOwner::Guest(token)))
    }
}
