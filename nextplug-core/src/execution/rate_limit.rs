//! Sliding-window rate limiting per `(plugin_id, operation)`.

use crate::config::RateLimit;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window counters keyed by plugin and operation.
///
/// Each key keeps the timestamps of admitted calls. Timestamps older than the
/// window are purged before every comparison.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<(String, String), VecDeque<Instant>>,
}

fn purge(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = timestamps.front() {
        if now.duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(plugin_id: &str, operation: &str) -> (String, String) {
        (plugin_id.to_string(), operation.to_string())
    }

    /// Check whether another call fits in the current window.
    pub fn can_execute(&self, plugin_id: &str, operation: &str, limit: &RateLimit) -> bool {
        let now = Instant::now();
        match self.windows.get_mut(&Self::key(plugin_id, operation)) {
            Some(mut timestamps) => {
                purge(&mut timestamps, limit.window(), now);
                timestamps.len() < limit.max_requests as usize
            }
            None => limit.max_requests > 0,
        }
    }

    /// Record an admitted call.
    pub fn record(&self, plugin_id: &str, operation: &str) {
        self.windows
            .entry(Self::key(plugin_id, operation))
            .or_default()
            .push_back(Instant::now());
    }

    /// Check and record in one step.
    ///
    /// The key's entry stays locked between the comparison and the insert, so
    /// concurrent callers never admit more than `max_requests` per window.
    pub fn try_acquire(&self, plugin_id: &str, operation: &str, limit: &RateLimit) -> bool {
        let now = Instant::now();
        let mut timestamps = self.windows.entry(Self::key(plugin_id, operation)).or_default();
        purge(&mut timestamps, limit.window(), now);
        if timestamps.len() < limit.max_requests as usize {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls still admissible in the current window.
    pub fn remaining(&self, plugin_id: &str, operation: &str, limit: &RateLimit) -> u32 {
        let now = Instant::now();
        let used = match self.windows.get_mut(&Self::key(plugin_id, operation)) {
            Some(mut timestamps) => {
                purge(&mut timestamps, limit.window(), now);
                timestamps.len()
            }
            None => 0,
        };
        (limit.max_requests as usize).saturating_sub(used) as u32
    }

    /// Forget every window of one plugin.
    pub fn reset(&self, plugin_id: &str) {
        self.windows.retain(|(owner, _), _| owner != plugin_id);
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
