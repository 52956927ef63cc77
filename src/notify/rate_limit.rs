//! Keyed rate limiter for noisy notifications.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Allows at most one event per window for each concern key.
///
/// Keys name the concern (for example `refresh_error:<account>` or
/// `overflow_notice`), so one limiter serves the whole process.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `true` and record the event if `key` has not fired within `window`.
    pub fn allow(&self, key: &str, window: Duration) -> bool {
        self.allow_at(key, window, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, key: &str, window: Duration, now: Instant) -> bool {
        let mut guard = match self.last_fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.get(key) {
            Some(last) if now.saturating_duration_since(*last) < window => false,
            _ => {
                guard.insert(key.to_owned(), now);
                true
            }
        }
    }

    /// Forget the history of `key`.
    pub fn reset(&self, key: &str) {
        let mut guard = match self.last_fired.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(key);
    }
}
