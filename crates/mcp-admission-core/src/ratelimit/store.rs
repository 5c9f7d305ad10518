use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::CounterStoreError;

/// Counter state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits recorded in the current window, this one included.
    pub count: u64,
    /// When the current window ends. Fixed when the window opens.
    pub reset_time: DateTime<Utc>,
}

/// Storage for fixed-window counters.
///
/// `increment` must be atomic per key: it opens a fresh window with a
/// count of one when none exists or the previous one expired, and
/// otherwise adds one without moving the window's reset time.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CounterStoreError>;

    /// Whether counts are shared with other gateway instances.
    fn is_distributed(&self) -> bool;

    async fn health_check(&self) -> bool {
        true
    }
}

/// End of a window opened at `now`. Saturates instead of overflowing, so an
/// out-of-range window never expires.
pub(crate) fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    i64::try_from(window.as_millis())
        .ok()
        .and_then(chrono::TimeDelta::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
