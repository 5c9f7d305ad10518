//! HTTP request handlers

pub mod admission;
pub mod health;

pub use admission::{admitted, auth_context};
pub use health::{health, metrics, not_found, ready, root};
