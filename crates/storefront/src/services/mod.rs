//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `cart` - Cart mutations, item counts, guest-to-user merge
//! - `identity` - Guest tokens and sign-in/sign-out over the session
//! - `checkout` - Validation, totals, order creation and payment hand-off
//! - `payment` - Hosted payment gateway client and webhook verification
//! - `settlement` - Applies verified gateway events to orders
//!
//! Services receive their repositories and gateway explicitly; none of them
//! read request context on their own.

pub mod cart;
pub mod checkout;
pub mod identity;
pub mod payment;
pub mod settlement;

pub use cart::{CartError, CartService};
pub use checkout::{CheckoutError, CheckoutService, OrderFactory};
pub use identity::{GuestIdentityProvider, IdentityError, SessionGuestIdentity, sign_in, sign_out};
pub use payment::{PaymentGateway, StripeGateway, WebhookVerifier};
pub use settlement::{SettlementOutcome, SettlementReconciler};
