//! Cart ownership: a signed-in user or an anonymous guest.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::id::UserId;

/// Errors that can occur when accepting a [`GuestToken`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GuestTokenError {
    #[error("guest token cannot be empty")]
    Empty,
    #[error("guest token must be at most {max} characters")]
    TooLong { max: usize },
    #[error("guest token may only contain visible ASCII characters")]
    InvalidCharacter,
}

/// Opaque credential identifying an anonymous cart owner.
///
/// The value is never interpreted beyond equality. It is only checked for
/// being a printable ASCII string of bounded length, since it round-trips
/// through a cookie-backed session.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuestToken(String);

impl GuestToken {
    pub const MAX_LENGTH: usize = 128;

    /// Accept a token issued earlier.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty, longer than
    /// [`Self::MAX_LENGTH`], or contains whitespace or control characters.
    pub fn parse(s: &str) -> Result<Self, GuestTokenError> {
        if s.is_empty() {
            return Err(GuestTokenError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(GuestTokenError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(GuestTokenError::InvalidCharacter);
        }
        Ok(Self(s.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for GuestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "GuestToken({prefix}...)")
    }
}

impl TryFrom<String> for GuestToken {
    type Error = GuestTokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GuestToken> for String {
    fn from(token: GuestToken) -> Self {
        token.0
    }
}

/// The identity a cart belongs to.
///
/// Exactly one of the two is ever resolved for a request. The storage layer
/// keeps at most one active cart per owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    User(UserId),
    Guest(GuestToken),
}

impl CartOwner {
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    #[must_use]
    pub const fn guest_token(&self) -> Option<&GuestToken> {
        match self {
            Self::User(_) => None,
            Self::Guest(token) => Some(token),
        }
    }

    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }
}

impl From<UserId> for CartOwner {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl From<GuestToken> for CartOwner {
    fn from(token: GuestToken) -> Self {
        Self::Guest(token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_token_validation() {
        assert!(GuestToken::parse("aZ09aZ09aZ09aZ09aZ09aZ09aZ09aZ09").is_ok());
        assert_eq!(GuestToken::parse(""), Err(GuestTokenError::Empty));
        assert_eq!(
            GuestToken::parse("has space"),
            Err(GuestTokenError::InvalidCharacter)
        );
        assert!(matches!(
            GuestToken::parse(&"x".repeat(129)),
            Err(GuestTokenError::TooLong { .. })
        ));
    }

    #[test]
    fn test_guest_token_debug_is_redacted() {
        let token = GuestToken::parse("abcdefghijklmnop").unwrap();
        let debug = format!("{token:?}");
        assert!(debug.contains("abcd"));
        assert!(!debug.contains("efgh"));
    }

    #[test]
    fn test_cart_owner_accessors() {
        let user = CartOwner::from(UserId::new(7));
        assert_eq!(user.user_id(), Some(UserId::new(7)));
        assert!(user.guest_token().is_none());
        assert!(!user.is_guest());

        let guest = CartOwner::from(GuestToken::parse("tok").unwrap());
        assert!(guest.user_id().is_none());
        assert_eq!(guest.guest_token().map(GuestToken::as_str), Some("tok"));
    }

    #[test]
    fn test_cart_owner_serializes_tagged() {
        let json = serde_json::to_value(CartOwner::User(UserId::new(3))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "user", "id": 3}));
    }
}
