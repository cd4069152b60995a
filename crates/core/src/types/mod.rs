//! Core types for Just One Dollar.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod owner;
pub mod price;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use owner::{CartOwner, GuestToken, GuestTokenError};
pub use price::{CurrencyCode, MoneyError, from_minor_units, round_money, to_minor_units};
pub use status::*;
