//! Fixed-window per-client request limiter.
//!
//! One window per identity: a counter plus the instant it resets. Windows are
//! created lazily and never evicted. The map sits behind a `std::sync::Mutex`
//! held only for the constant-time update.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Counter state for one identity.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: Instant,
}

/// Fixed-window limiter keyed by client identity.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Count one request from `identity`; `false` when the quota is spent.
    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock.
    pub fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count >= self.capacity {
            debug!("Rate limit hit for {}", identity);
            return false;
        }
        window.count += 1;
        true
    }

    /// Current window for `identity`, if one exists.
    pub fn window(&self, identity: &str) -> Option<RateWindow> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identity)
            .copied()
    }
}
