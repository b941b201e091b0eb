//! Fixed-window per-client rate limiting.
//!
//! In-memory and per-process; hibernation wipes it.  The counter resets on
//! the first request of each new window, independent of earlier arrival
//! times.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Sentinel key used when the client identifier header is absent.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            max: config.max,
            window: Duration::from_millis(config.window_ms),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `key`; returns false when the window budget is
    /// exhausted.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;
        window.count <= self.max
    }
}
