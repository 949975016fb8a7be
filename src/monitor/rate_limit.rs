//! Sliding-window rate limiter
//!
//! A single process-wide gate in front of the LLM backend: callers must get
//! a positive `allow()` before placing a network call. The window is a
//! timestamp log guarded by one lock, pruned on every check.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Calls permitted per window.
    pub max_calls: usize,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_calls: 60,
            window_secs: 60,
        }
    }
}

/// Thread-safe sliding-window limiter.
pub struct RateLimiter {
    config: RateLimiterConfig,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::with_capacity(config.max_calls)),
        }
    }

    /// Record and permit a call when the window has room; false otherwise.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let horizon = Duration::from_secs(self.config.window_secs);
        let mut window = self.window.lock();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= horizon {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.config.max_calls {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls currently counted in the window.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        let horizon = Duration::from_secs(self.config.window_secs);
        let window = self.window.lock();
        window
            .iter()
            .filter(|t| now.duration_since(**t) < horizon)
            .count()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
