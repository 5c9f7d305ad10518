//! Redis-backed counters shared by every gateway instance.
//!
//! Increment and expiry run as one Lua script so concurrent hits on the
//! same key, from any instance, are serialized by Redis.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use super::store::{window_end, CounterStore, WindowCount};
use crate::error::CounterStoreError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// INCR the window counter; arm the expiry only when the window opens
/// (or the key somehow lost its TTL). Replies `{count, remaining_ms}`.
const INCREMENT_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    local ttl = redis.call('PTTL', KEYS[1])
    if count == 1 or ttl < 0 then
        redis.call('PEXPIRE', KEYS[1], ARGV[1])
        ttl = tonumber(ARGV[1])
    end
    return {count, ttl}
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, CounterStoreError> {
        let client = Client::open(url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| CounterStoreError::Timeout(CONNECT_TIMEOUT))??;

        let store = Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        };
        if !store.ping(command_timeout.max(Duration::from_secs(1))).await {
            return Err(CounterStoreError::Unavailable(
                "PING failed after connect".to_string(),
            ));
        }

        info!(url = %redact(url), "rate limit counter store connected");
        Ok(store)
    }

    async fn ping(&self, timeout: Duration) -> bool {
        let mut conn = self.conn.clone();
        let reply = tokio::time::timeout(
            timeout,
            ::redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await;
        match reply {
            Ok(Ok(pong)) => pong == "PONG",
            Ok(Err(err)) => {
                warn!(error = %err, "counter store PING failed");
                false
            }
            Err(_) => {
                warn!(?timeout, "counter store PING timed out");
                false
            }
        }
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CounterStoreError> {
        let mut conn = self.conn.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let (count, remaining_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        if count < 1 {
            return Err(CounterStoreError::Protocol(format!(
                "counter for {key} returned {count}"
            )));
        }

        Ok(WindowCount {
            count: count as u64,
            reset_time: window_end(now, Duration::from_millis(remaining_ms.max(0) as u64)),
        })
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        self.ping(Duration::from_secs(1)).await
    }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((scheme_and_auth, host)) => {
            let scheme = scheme_and_auth
                .split_once("://")
                .map(|(s, _)| s)
                .unwrap_or("redis");
            format!("{scheme}://***@{host}")
        }
        None => url.to_string(),
    }
}
