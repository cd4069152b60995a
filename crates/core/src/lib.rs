//! Just One Dollar Core - Shared domain types.
//!
//! This crate provides the types shared by the storefront and its tooling:
//! - `storefront` - Cart, checkout and payment settlement service
//! - `cli` - Migrations and operator reports
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, cart ownership, money, emails, and order/payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
