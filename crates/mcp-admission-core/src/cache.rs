//! TTL-bounded in-memory cache of resolved API keys.
//!
//! Entries are dropped lazily on read once expired and by a periodic sweep
//! task owned by the cache. The sweep holds only a weak reference, so it
//! also ends when the last handle to the cache is dropped.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::context::AuthContext;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry {
    auth_context: Arc<AuthContext>,
    expires_at: Instant,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub ttl: Duration,
}

pub struct CredentialCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
}

impl CredentialCache {
    /// Create a cache without a sweeper. Expired entries are still never
    /// returned; they are only reclaimed on read or by [`sweep`](Self::sweep).
    pub fn new(ttl: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            entries: DashMap::new(),
            ttl,
            shutdown,
        }
    }

    /// Create a cache and spawn its periodic sweep on the current runtime.
    pub fn start(ttl: Duration, sweep_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(Self::new(ttl));
        let weak = Arc::downgrade(&cache);
        let shutdown = cache.shutdown.subscribe();
        tokio::spawn(run_sweeper(weak, shutdown, sweep_interval));
        debug!(?ttl, ?sweep_interval, "credential cache sweeper started");
        cache
    }

    /// Look up a key. Never returns an entry whose expiry has passed.
    pub fn get(&self, key: &str) -> Option<Arc<AuthContext>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                metrics::counter!("gateway_auth_cache_hits_total").increment(1);
                return Some(Arc::clone(&entry.auth_context));
            }
        }

        // Re-check under the shard lock so a concurrent `put` is never undone.
        if self
            .entries
            .remove_if(key, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            metrics::counter!("gateway_auth_cache_evictions_total").increment(1);
        }
        metrics::counter!("gateway_auth_cache_misses_total").increment(1);
        None
    }

    /// Insert or replace the entry for `key`, expiring one TTL from now.
    pub fn put(&self, key: impl Into<String>, auth_context: Arc<AuthContext>) {
        let entry = CacheEntry {
            auth_context,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(key.into(), entry);
        metrics::gauge!("gateway_auth_cache_entries").set(self.entries.len() as f64);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            metrics::counter!("gateway_auth_cache_evictions_total").increment(removed as u64);
            debug!(count = removed, "cleaned expired API key cache entries");
        }
        metrics::gauge!("gateway_auth_cache_entries").set(self.entries.len() as f64);
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::gauge!("gateway_auth_cache_entries").set(0.0);
        info!("API key cache cleared");
    }

    /// Raw entry count, including entries that expired but were not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ttl: self.ttl,
        }
    }

    /// Stop the sweeper and drop all entries.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        self.clear();
        debug!("credential cache closed");
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("size", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

async fn run_sweeper(
    cache: Weak<CredentialCache>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else { break };
                cache.sweep();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("credential cache sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RateLimitSettings;
    use std::collections::BTreeSet;

    fn ctx(tenant: &str) -> Arc<AuthContext> {
        Arc::new(AuthContext {
            api_key_id: format!("key-{tenant}"),
            tenant_id: tenant.to_string(),
            scopes: BTreeSet::new(),
            rate_limit: RateLimitSettings::default(),
            metadata: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl() {
        let cache = CredentialCache::new(DEFAULT_CACHE_TTL);
        cache.put("k", ctx("acme"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("k").unwrap().tenant_id, "acme");
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_at_expiry_is_absent_and_removes() {
        let cache = CredentialCache::new(DEFAULT_CACHE_TTL);
        cache.put("k", ctx("acme"));

        tokio::time::advance(DEFAULT_CACHE_TTL).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_refreshes_expiry() {
        let cache = CredentialCache::new(Duration::from_secs(10));
        cache.put("k", ctx("acme"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("k", ctx("globex"));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("k").unwrap().tenant_id, "globex");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = CredentialCache::new(Duration::from_secs(10));
        cache.put("old", ctx("a"));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put("new", ctx("b"));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get("old").is_none());
        assert!(cache.get("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_reclaims_entries() {
        let cache = CredentialCache::start(DEFAULT_CACHE_TTL, DEFAULT_SWEEP_INTERVAL);
        cache.put("k", ctx("acme"));
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(6 * 60 + 1)).await;
        assert_eq!(cache.len(), 0);
        cache.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_clears_entries() {
        let cache = CredentialCache::start(DEFAULT_CACHE_TTL, DEFAULT_SWEEP_INTERVAL);
        cache.put("a", ctx("a"));
        cache.put("b", ctx("b"));
        assert_eq!(cache.stats(), CacheStats { size: 2, ttl: DEFAULT_CACHE_TTL });

        cache.close();
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_get_sweep() {
        let cache = Arc::new(CredentialCache::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for j in 0..200 {
                    let key = format!("key-{}", (i * 7 + j) % 32);
                    cache.put(key.clone(), ctx("acme"));
                    assert!(cache.get(&key).is_some());
                    if j % 50 == 0 {
                        cache.sweep();
                    }
                }
            }));
        }
        for handle in futures::future::join_all(handles).await {
            handle.unwrap();
        }
        assert_eq!(cache.len(), 32);
    }
}
