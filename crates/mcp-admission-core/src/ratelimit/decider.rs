use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::local::LocalCounterStore;
use super::store::{CounterStore, WindowCount};
use super::RateLimitScope;
use crate::error::CounterStoreError;

const DEFAULT_KEY_PREFIX: &str = "rl:";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_DEGRADED_COOLDOWN: Duration = Duration::from_secs(5);

/// Outcome of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub reset_time: DateTime<Utc>,
    /// Counted locally because the distributed store was unavailable.
    pub degraded: bool,
}

impl Decision {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Where counts are currently being kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterMode {
    /// No distributed store configured.
    Local,
    Distributed,
    /// Distributed store configured but failing; counting locally.
    Degraded,
}

impl fmt::Display for CounterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Distributed => "distributed",
            Self::Degraded => "degraded",
        })
    }
}

/// Fixed-window limiter shared by every limiter layer.
///
/// Counts go to the distributed store when one is configured. A failed or
/// slow call is answered from the local store instead and the distributed
/// store is skipped until the cooldown passes.
pub struct RateLimitDecider {
    distributed: Option<Arc<dyn CounterStore>>,
    local: Arc<LocalCounterStore>,
    key_prefix: String,
    call_timeout: Duration,
    degraded_cooldown: Duration,
    /// Epoch millis before which the distributed store is not tried. Zero when healthy.
    retry_distributed_at: AtomicI64,
    degraded: AtomicBool,
}

impl RateLimitDecider {
    /// A decider that only counts in process.
    pub fn local(local: Arc<LocalCounterStore>) -> Self {
        Self {
            distributed: None,
            local,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            degraded_cooldown: DEFAULT_DEGRADED_COOLDOWN,
            retry_distributed_at: AtomicI64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// A decider backed by `distributed`, falling back to `local`.
    pub fn distributed(distributed: Arc<dyn CounterStore>, local: Arc<LocalCounterStore>) -> Self {
        Self {
            distributed: Some(distributed),
            ..Self::local(local)
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_degraded_cooldown(mut self, cooldown: Duration) -> Self {
        self.degraded_cooldown = cooldown;
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn local_store(&self) -> &Arc<LocalCounterStore> {
        &self.local
    }

    /// Counter key for a `(scope, identity)` pair.
    pub fn key(&self, scope: &RateLimitScope, identity: &str) -> String {
        format!("{}{}:{}", self.key_prefix, scope, identity)
    }

    /// Count one request for `identity` in `scope` and decide whether it fits.
    pub async fn decide(
        &self,
        scope: &RateLimitScope,
        identity: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Decision {
        let key = self.key(scope, identity);
        let (counted, degraded) = self.increment(&key, window, now).await;

        Decision {
            allowed: counted.count <= limit,
            count: counted.count,
            limit,
            reset_time: counted.reset_time,
            degraded,
        }
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> (WindowCount, bool) {
        let Some(store) = self.distributed.as_ref() else {
            return (self.local.hit(key, window, now), false);
        };

        if now.timestamp_millis() < self.retry_distributed_at.load(Ordering::Acquire) {
            return (self.local.hit(key, window, now), true);
        }

        match tokio::time::timeout(self.call_timeout, store.increment(key, window, now)).await {
            Ok(Ok(counted)) => {
                if self.degraded.swap(false, Ordering::AcqRel) {
                    self.retry_distributed_at.store(0, Ordering::Release);
                    info!("rate limit counter store recovered, distributed counting resumed");
                }
                (counted, false)
            }
            Ok(Err(err)) => {
                self.degrade(now, "error", &err);
                (self.local.hit(key, window, now), true)
            }
            Err(_) => {
                self.degrade(now, "timeout", &CounterStoreError::Timeout(self.call_timeout));
                (self.local.hit(key, window, now), true)
            }
        }
    }

    fn degrade(&self, now: DateTime<Utc>, reason: &'static str, err: &CounterStoreError) {
        let retry_at = now.timestamp_millis() + self.degraded_cooldown.as_millis() as i64;
        self.retry_distributed_at.store(retry_at, Ordering::Release);
        self.degraded.store(true, Ordering::Release);

        metrics::counter!("gateway_rate_limit_degraded_total", "reason" => reason).increment(1);
        warn!(
            error = %err,
            reason,
            cooldown_ms = self.degraded_cooldown.as_millis() as u64,
            "rate limit counter store failed, counting locally; limits are per instance"
        );
    }

    pub fn mode(&self) -> CounterMode {
        match self.distributed {
            None => CounterMode::Local,
            Some(_) if self.degraded.load(Ordering::Acquire) => CounterMode::Degraded,
            Some(_) => CounterMode::Distributed,
        }
    }

    /// Health of the distributed store; always healthy when counting locally.
    pub async fn health_check(&self) -> bool {
        match &self.distributed {
            Some(store) => store.health_check().await,
            None => true,
        }
    }
}

impl fmt::Debug for RateLimitDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitDecider")
            .field("mode", &self.mode())
            .field("key_prefix", &self.key_prefix)
            .field("call_timeout", &self.call_timeout)
            .field("degraded_cooldown", &self.degraded_cooldown)
            .finish()
    }
}
