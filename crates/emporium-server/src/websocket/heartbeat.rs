//! Heartbeat ping/pong liveness policy.
//!
//! The inbound pump refreshes its read deadline to `now + pong_wait` on every
//! frame; the outbound pump pings every `ping_period`. A peer that goes silent
//! for longer than `pong_wait` fails its next read with a deadline error.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Default maximum time for a single write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
/// Default maximum inbound silence.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// Default inbound frame ceiling (100 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024;

/// Ping/pong cadence and deadline configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Maximum time to complete any single write.
    pub write_wait: Duration,
    /// Maximum silence before the connection is presumed dead.
    pub pong_wait: Duration,
    /// Interval between server pings; must be below `pong_wait`.
    pub ping_period: Duration,
    /// Inbound frame size ceiling in bytes.
    pub max_message_size: usize,
}

impl HeartbeatPolicy {
    /// Policy with `ping_period` derived as 90% of `pong_wait`.
    pub fn with_pong_wait(write_wait: Duration, pong_wait: Duration, max_message_size: usize) -> Self {
        Self {
            write_wait,
            pong_wait,
            ping_period: pong_wait / 10 * 9,
            max_message_size,
        }
    }

    /// Whether at least one ping fits inside every pong window.
    pub fn is_sound(&self) -> bool {
        !self.ping_period.is_zero() && self.ping_period < self.pong_wait
    }

    /// Read deadline for a frame arriving at `now`.
    pub fn read_deadline(&self, now: Instant) -> Instant {
        now + self.pong_wait
    }

    /// Deadline for a write starting at `now`.
    pub fn write_deadline(&self, now: Instant) -> Instant {
        now + self.write_wait
    }

    /// Ping ticker whose first tick fires one full period from now.
    pub fn ping_interval(&self) -> Interval {
        let period = self.ping_period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self::with_pong_wait(DEFAULT_WRITE_WAIT, DEFAULT_PONG_WAIT, DEFAULT_MAX_MESSAGE_SIZE)
    }
}
