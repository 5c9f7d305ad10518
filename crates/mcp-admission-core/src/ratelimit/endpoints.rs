//! Per-endpoint limits for expensive operations.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub const TOOLS_SELECT: &str = "tools-select";
pub const TOOLS_INVOKE: &str = "tools-invoke";
pub const TOOLS_LIST: &str = "tools-list";
pub const OAUTH_CONFIG_POST: &str = "oauth-config-post";
pub const OAUTH_CONFIG_GET: &str = "oauth-config-get";
pub const OAUTH_CONFIG_DELETE: &str = "oauth-config-delete";
pub const INTEGRATIONS_LIST: &str = "integrations-list";

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// A named endpoint's allowance, stated as a per-second rate over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLimit {
    pub name: String,
    pub requests_per_second: f64,
    pub window: Duration,
}

impl EndpointLimit {
    pub fn new(name: impl Into<String>, requests_per_second: f64, window: Duration) -> Self {
        Self {
            name: name.into(),
            requests_per_second,
            window,
        }
    }

    /// Requests allowed per window: `ceil(rps * window_ms / 1000)`.
    pub fn max_requests(&self) -> u64 {
        let window_ms = self.window.as_millis() as f64;
        (self.requests_per_second * window_ms / 1000.0).ceil() as u64
    }
}

/// Configuration override for one endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointLimitSpec {
    pub requests_per_second: f64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW.as_millis() as u64
}

/// Lookup table of endpoint limits.
#[derive(Debug, Clone)]
pub struct EndpointLimits {
    limits: HashMap<String, EndpointLimit>,
}

impl Default for EndpointLimits {
    fn default() -> Self {
        let limits = [
            (TOOLS_SELECT, 10.0),
            (TOOLS_INVOKE, 20.0),
            (TOOLS_LIST, 5.0),
            (OAUTH_CONFIG_POST, 1.0),
            (OAUTH_CONFIG_GET, 10.0),
            (OAUTH_CONFIG_DELETE, 1.0),
            (INTEGRATIONS_LIST, 5.0),
        ]
        .into_iter()
        .map(|(name, rps)| EndpointLimit::new(name, rps, DEFAULT_WINDOW));
        Self::from_limits(limits)
    }
}

impl EndpointLimits {
    pub fn from_limits(limits: impl IntoIterator<Item = EndpointLimit>) -> Self {
        Self {
            limits: limits.into_iter().map(|l| (l.name.clone(), l)).collect(),
        }
    }

    /// Defaults with configured entries replacing or adding endpoints.
    pub fn with_overrides(overrides: &BTreeMap<String, EndpointLimitSpec>) -> Self {
        let mut table = Self::default();
        for (name, limit) in overrides {
            table.limits.insert(
                name.clone(),
                EndpointLimit::new(
                    name.clone(),
                    limit.requests_per_second,
                    Duration::from_millis(limit.window_ms),
                ),
            );
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&EndpointLimit> {
        self.limits.get(name)
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_per_minute() {
        let table = EndpointLimits::default();
        let per_minute = |name| table.get(name).unwrap().max_requests();
        assert_eq!(per_minute(TOOLS_SELECT), 600);
        assert_eq!(per_minute(TOOLS_INVOKE), 1200);
        assert_eq!(per_minute(TOOLS_LIST), 300);
        assert_eq!(per_minute(OAUTH_CONFIG_POST), 60);
        assert_eq!(per_minute(OAUTH_CONFIG_GET), 600);
        assert_eq!(per_minute(OAUTH_CONFIG_DELETE), 60);
        assert_eq!(per_minute(INTEGRATIONS_LIST), 300);
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn test_max_requests_rounds_up() {
        let limit = EndpointLimit::new("x", 0.5, Duration::from_millis(2_500));
        assert_eq!(limit.max_requests(), 2);
        let limit = EndpointLimit::new("x", 1.0, Duration::from_secs(1));
        assert_eq!(limit.max_requests(), 1);
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            TOOLS_SELECT.to_string(),
            EndpointLimitSpec {
                requests_per_second: 0.05,
                window_ms: 60_000,
            },
        );
        overrides.insert(
            "mcp-deploy".to_string(),
            EndpointLimitSpec {
                requests_per_second: 2.0,
                window_ms: 1_000,
            },
        );
        let table = EndpointLimits::with_overrides(&overrides);
        assert_eq!(table.get(TOOLS_SELECT).unwrap().max_requests(), 3);
        assert_eq!(table.get("mcp-deploy").unwrap().max_requests(), 2);
        assert_eq!(table.len(), 8);
    }
}
