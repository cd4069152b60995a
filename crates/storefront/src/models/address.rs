//! Customer addresses, read-only for checkout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use just_one_dollar_core::{AddressId, UserId};

/// A user's shipping or billing address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}
