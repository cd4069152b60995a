//! HTTP middleware for the storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP context)
//! 2. `TraceLayer` (request span)
//! 3. Request ID (recorded on the span, echoed in the response)
//! 4. Session layer (tower-sessions, signed cookie)

pub mod auth;
pub mod request_id;
pub mod session;

pub use auth::{AuthRejection, CartIdentity, OptionalAuth, RequireAuth};
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
pub use session::{SESSION_COOKIE_NAME, create_session_layer};
