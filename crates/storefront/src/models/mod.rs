//! Domain models for the storefront.
//!
//! Plain data carried between repositories, services and handlers. Money is
//! always a major-unit [`rust_decimal::Decimal`].

pub mod address;
pub mod cart;
pub mod order;
pub mod product;
pub mod session;

pub use address::Address;
pub use cart::{Cart, CartItem, MAX_LINE_QUANTITY};
pub use order::{
    NewOrder, NewOrderLine, Order, OrderLine, OrderPage, OrderPayment, OrderTotals,
    SettleResult, SettlementUpdate,
};
pub use product::Product;
pub use session::{CurrentUser, keys as session_keys};
