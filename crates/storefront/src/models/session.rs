//! Session-stored identity.

use serde::{Deserialize, Serialize};

use just_one_dollar_core::{Email, UserId};

/// The signed-in user, as handed over by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: Email,
}

/// Session keys.
pub mod keys {
    /// The signed-in [`super::CurrentUser`].
    pub const CURRENT_USER: &str = "current_user";

    /// Opaque guest token owning the anonymous cart.
    pub const GUEST_TOKEN: &str = "guest_token";
}
