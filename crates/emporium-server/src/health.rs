//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::websocket::Hub;

/// Liveness snapshot of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once shutdown has begun.
    pub status: &'static str,
    /// Whole seconds since the server started.
    pub uptime_secs: u64,
    /// Registered sessions.
    pub connections: usize,
    /// Rooms with at least one live member.
    pub rooms: usize,
}

impl HealthResponse {
    /// Read the hub's counters.
    pub fn snapshot(hub: &Hub, started: Instant, draining: bool) -> Self {
        Self {
            status: if draining { "draining" } else { "ok" },
            uptime_secs: started.elapsed().as_secs(),
            connections: hub.session_count(),
            rooms: hub.room_count(),
        }
    }
}
