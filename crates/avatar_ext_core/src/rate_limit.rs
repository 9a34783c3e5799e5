//! Fixed-window request counter for outbound fetches.
//!
//! # Responsibility
//! - Bound how often one key (typically a URL) may be fetched per window.
//!
//! # Invariants
//! - Distinct keys are fully independent.
//! - A rejected call never increments the counter.
//! - State is in-process only; a new limiter starts empty.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Entries are pruned of expired windows once the map grows past this.
const PRUNE_THRESHOLD: usize = 1_024;

/// Counter state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    /// `None` when the window end is past what `Instant` can represent; such
    /// a window never expires.
    pub window_reset_at: Option<Instant>,
}

impl RateLimitEntry {
    fn is_open_at(&self, now: Instant) -> bool {
        self.window_reset_at.map_or(true, |reset| now <= reset)
    }
}

/// Per-key fixed-window rate limiter.
///
/// Owned by the ingestion service it throttles; tests inject a fresh one.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one request for `key`; returns `false` when the window's
    /// budget of `max_requests` is spent.
    pub fn check_and_consume(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.check_and_consume_at(key, max_requests, window, Instant::now())
    }

    /// `check_and_consume` against an explicit clock reading.
    pub fn check_and_consume_at(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: Instant,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= PRUNE_THRESHOLD {
            entries.retain(|_, entry| entry.is_open_at(now));
        }

        match entries.get_mut(key) {
            Some(entry) if entry.is_open_at(now) => {
                if entry.count < max_requests {
                    entry.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                // First call of a fresh window is always admitted.
                entries.insert(
                    key.to_string(),
                    RateLimitEntry {
                        count: 1,
                        window_reset_at: now.checked_add(window),
                    },
                );
                true
            }
        }
    }

    /// Current counter state of `key`, if any.
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}
