//! Startup-time settings for the admission pipeline.
//!
//! Both structs deserialize with every field defaulted, so a partial
//! configuration source only needs to name what it changes. They are
//! read-only once the pipeline is built.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::authorizer::{require_scopes, ScopeRequirement};
use crate::cache::{DEFAULT_CACHE_TTL, DEFAULT_SWEEP_INTERVAL};
use crate::ratelimit::{EndpointLimitSpec, EndpointLimits};

/// Longest window any limiter layer accepts.
pub const MAX_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Limiter layer settings.
///
/// `global_rps` and `tenant_rps` are the number of requests admitted per
/// window of the respective layer (1 second and 60 seconds by default).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub global_enabled: bool,
    pub global_rps: u64,
    pub global_window_ms: u64,
    pub tenant_enabled: bool,
    pub tenant_rps: u64,
    pub tenant_window_ms: u64,
    pub endpoint_limits_enabled: bool,
    /// Path prefixes that bypass the global and tenant layers.
    pub exempt_paths: Vec<String>,
    /// Distributed counter store; local counting when unset.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub store_timeout_ms: u64,
    pub degraded_cooldown_ms: u64,
    pub local_max_windows: usize,
    /// Per-endpoint overrides merged over the built-in table.
    pub endpoints: BTreeMap<String, EndpointLimitSpec>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_enabled: true,
            global_rps: 1000,
            global_window_ms: 1_000,
            tenant_enabled: true,
            tenant_rps: 100,
            tenant_window_ms: 60_000,
            endpoint_limits_enabled: true,
            exempt_paths: vec!["/health".to_string(), "/ready".to_string()],
            redis_url: None,
            key_prefix: "rl:".to_string(),
            store_timeout_ms: 250,
            degraded_cooldown_ms: 5_000,
            local_max_windows: 100_000,
            endpoints: BTreeMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    pub fn global_window(&self) -> Duration {
        Duration::from_millis(self.global_window_ms.max(1))
    }

    pub fn tenant_window(&self) -> Duration {
        Duration::from_millis(self.tenant_window_ms.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    pub fn degraded_cooldown(&self) -> Duration {
        Duration::from_millis(self.degraded_cooldown_ms)
    }

    pub fn endpoint_limits(&self) -> EndpointLimits {
        EndpointLimits::with_overrides(&self.endpoints)
    }
}

/// Authentication settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub store_timeout_ms: u64,
    /// JSON file of credential records for the built-in key store.
    pub keys_file: Option<PathBuf>,
    /// Scopes each endpoint requires, keyed by endpoint name.
    pub route_scopes: BTreeMap<String, Vec<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            cache_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            store_timeout_ms: 2_000,
            keys_file: None,
            route_scopes: BTreeMap::new(),
        }
    }
}

impl AuthConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    /// Scope requirement configured for an endpoint; empty when none is.
    pub fn scopes_for(&self, endpoint: &str) -> ScopeRequirement {
        match self.route_scopes.get(endpoint) {
            Some(scopes) => require_scopes(scopes.iter().cloned()),
            None => ScopeRequirement::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.global_rps, 1000);
        assert_eq!(config.global_window(), Duration::from_secs(1));
        assert_eq!(config.tenant_rps, 100);
        assert_eq!(config.tenant_window(), Duration::from_secs(60));
        assert_eq!(config.key_prefix, "rl:");
        assert!(config.redis_url.is_none());
        assert_eq!(config.endpoint_limits().len(), 7);
    }

    #[test]
    fn test_exempt_paths_match_prefixes() {
        let config = RateLimitConfig::default();
        assert!(config.is_exempt("/health"));
        assert!(config.is_exempt("/ready/deep"));
        assert!(!config.is_exempt("/api/v1/tools/list"));

        let config = RateLimitConfig {
            exempt_paths: vec![String::new()],
            ..RateLimitConfig::default()
        };
        assert!(!config.is_exempt("/api"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RateLimitConfig = serde_json::from_value(serde_json::json!({
            "global_rps": 5,
            "endpoints": { "tools-list": { "requests_per_second": 1.0 } }
        }))
        .unwrap();
        assert_eq!(config.global_rps, 5);
        assert_eq!(config.tenant_rps, 100);
        assert_eq!(
            config.endpoint_limits().get("tools-list").unwrap().max_requests(),
            60
        );
    }

    #[test]
    fn test_route_scopes() {
        let auth: AuthConfig = serde_json::from_value(serde_json::json!({
            "route_scopes": { "tools-invoke": ["tools.invoke"] }
        }))
        .unwrap();
        assert_eq!(auth.scopes_for("tools-invoke").required(), ["tools.invoke"]);
        assert!(auth.scopes_for("tools-list").is_empty());
        assert_eq!(auth.cache_ttl(), Duration::from_secs(300));
    }
}
