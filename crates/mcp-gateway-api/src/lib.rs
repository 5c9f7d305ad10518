//! MCP Gateway HTTP API
//!
//! Runs the admission pipeline from `mcp-admission-core` in front of the
//! gateway's API routes: rate limiting on every request, API key
//! authentication and tenant/scope authorization on protected routes.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod state;

pub use config::{ConfigError, GatewayConfig, ServerConfig};
pub use router::create_router_with_state;
pub use state::AppState;
