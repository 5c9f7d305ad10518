//! Middleware layers
//!
//! ## Available Middleware
//!
//! - `traffic`: global and tenant rate limits, applied to every route
//! - `guard`: endpoint limit, API key authentication and authorization for protected routes
//! - `recovery`: error envelope for handler panics
//! - `request`: shared extraction of client IP, tenant ids and credentials

pub mod guard;
pub mod recovery;
pub mod request;
pub mod traffic;

// Re-exports
pub use guard::{route_guard, AdmittedEndpoint, RouteGuard};
pub use recovery::{handle_panic, recover_internal_errors};
pub use traffic::traffic_middleware;
