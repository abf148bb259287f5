//! Per-connection fixed-window inbound rate limiter.
//!
//! Excess frames are dropped rather than disconnecting the client: bursty
//! traffic such as typing indicators would otherwise turn into reconnect storms.

use std::time::Duration;

use tokio::time::Instant;

/// Length of one counting window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counts inbound frames in one-second windows.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    count: u32,
    window_start: Instant,
}

impl RateLimiter {
    /// Allow up to `limit` frames per window. A limit of `0` disables limiting.
    pub fn new(limit: u32, now: Instant) -> Self {
        Self {
            limit,
            count: 0,
            window_start: now,
        }
    }

    /// Record one inbound frame at `now`; returns `false` if it must be dropped.
    pub fn allow(&mut self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        if now.saturating_duration_since(self.window_start) >= RATE_WINDOW {
            self.count = 0;
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.limit
    }

    /// Frames counted in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }
}
