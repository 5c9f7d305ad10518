//! In-process fixed-window counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{window_end, CounterStore, WindowCount};
use crate::error::CounterStoreError;

const DEFAULT_MAX_WINDOWS: usize = 100_000;

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u64,
    reset_time: DateTime<Utc>,
}

/// Counters held in a sharded map; each increment runs under its shard lock.
///
/// Expired windows are purged once the map reaches `max_windows`.
#[derive(Debug)]
pub struct LocalCounterStore {
    windows: DashMap<String, LocalWindow>,
    max_windows: usize,
}

impl Default for LocalCounterStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WINDOWS)
    }
}

impl LocalCounterStore {
    pub fn new(max_windows: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_windows: max_windows.max(1),
        }
    }

    /// Record one hit on `key` and return the window state.
    pub fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowCount {
        if self.windows.len() >= self.max_windows && !self.windows.contains_key(key) {
            self.purge_expired(now);
        }

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| LocalWindow {
                count: 0,
                reset_time: window_end(now, window),
            });

        if now >= entry.reset_time {
            entry.count = 0;
            entry.reset_time = window_end(now, window);
        }
        entry.count += 1;

        WindowCount {
            count: entry.count,
            reset_time: entry.reset_time,
        }
    }

    /// Drop every window whose reset time has passed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_time > now);
        let removed = before.saturating_sub(self.windows.len());
        if self.windows.len() >= self.max_windows {
            warn!(
                windows = self.windows.len(),
                max_windows = self.max_windows,
                "local rate limit store over capacity with only live windows"
            );
        } else if removed > 0 {
            debug!(count = removed, "purged expired local rate limit windows");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CounterStoreError> {
        Ok(self.hit(key, window, now))
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-11-17T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ms(n: i64) -> chrono::Duration {
        chrono::Duration::milliseconds(n)
    }

    #[test]
    fn test_first_hit_opens_window() {
        let store = LocalCounterStore::default();
        let hit = store.hit("rl:tenant:acme", MINUTE, t0());
        assert_eq!(hit.count, 1);
        assert_eq!(hit.reset_time, t0() + ms(60_000));
    }

    #[test]
    fn test_increments_do_not_extend_window() {
        let store = LocalCounterStore::default();
        store.hit("k", MINUTE, t0());
        let second = store.hit("k", MINUTE, t0() + ms(30_000));
        let third = store.hit("k", MINUTE, t0() + ms(59_999));
        assert_eq!(second.count, 2);
        assert_eq!(third.count, 3);
        assert_eq!(third.reset_time, t0() + ms(60_000));
    }

    #[test]
    fn test_resets_at_window_boundary() {
        let store = LocalCounterStore::default();
        store.hit("k", MINUTE, t0());
        store.hit("k", MINUTE, t0());
        let next = store.hit("k", MINUTE, t0() + ms(60_000));
        assert_eq!(next.count, 1);
        assert_eq!(next.reset_time, t0() + ms(120_000));
    }

    #[test]
    fn test_keys_are_independent() {
        let store = LocalCounterStore::default();
        store.hit("rl:tenant:a", MINUTE, t0());
        store.hit("rl:tenant:a", MINUTE, t0());
        assert_eq!(store.hit("rl:tenant:b", MINUTE, t0()).count, 1);
    }

    #[test]
    fn test_capacity_purges_expired_windows() {
        let store = LocalCounterStore::new(2);
        store.hit("a", Duration::from_secs(1), t0());
        store.hit("b", Duration::from_secs(1), t0());
        assert_eq!(store.len(), 2);

        store.hit("c", Duration::from_secs(1), t0() + ms(1_500));
        assert_eq!(store.len(), 1);
    }
}
