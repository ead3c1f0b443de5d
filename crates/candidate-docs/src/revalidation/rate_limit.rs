//! Fixed-window limiter for outbound classifier calls.
//!
//! The window restarts once 60 seconds have passed since it opened, clearing both counters.
//! Calls made just before and just after a boundary can therefore burst up to twice the cap.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::clock::Clock;

pub const WINDOW: Duration = Duration::from_secs(60);

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 25;
const DEFAULT_COST_UNITS_PER_MINUTE: u32 = 5500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub cost_units_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            cost_units_per_minute: DEFAULT_COST_UNITS_PER_MINUTE,
        }
    }
}

/// Coarse token estimate for a classifier response of `bytes` length.
pub fn estimate_cost_units(bytes: usize) -> u32 {
    let units = bytes.div_ceil(4);
    u32::try_from(units).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub started_at: DateTime<Utc>,
    pub requests: u32,
    pub cost_units: u32,
}

#[derive(Debug)]
struct Window {
    started_at: DateTime<Utc>,
    requests: u32,
    cost_units: u32,
}

impl Window {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            requests: 0,
            cost_units: 0,
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> bool {
        (now - self.started_at)
            .to_std()
            .map(|elapsed| elapsed >= WINDOW)
            .unwrap_or(false)
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let ends_at = self.started_at + chrono::Duration::seconds(WINDOW.as_secs() as i64);
        (ends_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

pub struct RateLimiter<K> {
    config: RateLimitConfig,
    clock: Arc<K>,
    window: Mutex<Window>,
}

impl<K: Clock> RateLimiter<K> {
    /// Caps below one are raised to one so a call can always be admitted eventually.
    pub fn new(config: RateLimitConfig, clock: Arc<K>) -> Self {
        let window = Window::fresh(clock.now());
        Self {
            config: RateLimitConfig {
                requests_per_minute: config.requests_per_minute.max(1),
                cost_units_per_minute: config.cost_units_per_minute.max(1),
            },
            clock,
            window: Mutex::new(window),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Blocks until one more call fits in the current window, then reserves it.
    ///
    /// The cost of the upcoming call is unknown, so the cost cap admits a call while any
    /// budget remains.
    pub fn throttle(&self) {
        loop {
            let now = self.clock.now();
            let wait = {
                let mut window = self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if window.elapsed(now) {
                    *window = Window::fresh(now);
                }
                if window.requests < self.config.requests_per_minute
                    && window.cost_units < self.config.cost_units_per_minute
                {
                    window.requests += 1;
                    return;
                }
                window.remaining(now)
            };

            debug!(wait_ms = wait.as_millis() as u64, "classifier rate limit reached");
            // A zero wait means the window ends right now; the next pass resets it.
            self.clock.sleep(wait.max(Duration::from_millis(1)));
        }
    }

    /// Adds the cost of a completed call to the current window.
    pub fn record_cost(&self, units: u32) {
        let mut window = self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        window.cost_units = window.cost_units.saturating_add(units);
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let window = self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        WindowSnapshot {
            started_at: window.started_at,
            requests: window.requests,
            cost_units: window.cost_units,
        }
    }
}
