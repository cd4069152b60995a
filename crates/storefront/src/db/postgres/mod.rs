//! `PostgreSQL` implementations of the repository contracts.
//!
//! Queries are built at runtime with `sqlx::query_as` and `FromRow` row
//! structs, so the crate compiles without a live database.

mod carts;
mod catalog;
mod orders;
mod payments;

pub use carts::PgCartRepository;
pub use catalog::{PgAddressBook, PgProductCatalog};
pub use orders::PgOrderRepository;
pub use payments::PgOrderPaymentRepository;
