//! Fixed-window rate limiting.
//!
//! A [`RateLimitDecider`] answers "is this identity over its limit in this
//! window" against a [`CounterStore`]. Two stores exist: [`RedisCounterStore`]
//! shares counters between gateway instances, [`LocalCounterStore`] keeps
//! them in process and doubles as the degraded-mode fallback.

mod decider;
pub mod endpoints;
mod local;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use decider::{CounterMode, Decision, RateLimitDecider};
pub use endpoints::{EndpointLimit, EndpointLimitSpec, EndpointLimits};
pub use local::LocalCounterStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;
pub use store::{CounterStore, WindowCount};

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::config::RateLimitConfig;

/// Which limiter layer a window belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Global,
    Tenant,
    Endpoint(String),
}

impl RateLimitScope {
    /// Scope family without the endpoint name, for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Tenant => "tenant",
            Self::Endpoint(_) => "endpoint",
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant => f.write_str("tenant"),
            Self::Endpoint(name) => write!(f, "endpoint:{name}"),
        }
    }
}

impl Serialize for RateLimitScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Connect the distributed counter store named by the configuration.
///
/// Returns `None` when none is configured or the connection fails; the
/// gateway then counts locally.
pub async fn connect_counter_store(config: &RateLimitConfig) -> Option<Arc<dyn CounterStore>> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("no counter store configured, using in-memory rate limiting");
        return None;
    };
    connect_redis(url, config).await
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str, config: &RateLimitConfig) -> Option<Arc<dyn CounterStore>> {
    match RedisCounterStore::connect(url, config.store_timeout()).await {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize rate limit counter store");
            metrics::counter!("gateway_rate_limit_degraded_total", "reason" => "startup")
                .increment(1);
            tracing::warn!("counter store not available, using in-memory rate limiting");
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str, _config: &RateLimitConfig) -> Option<Arc<dyn CounterStore>> {
    tracing::warn!("built without the redis feature, using in-memory rate limiting");
    None
}
