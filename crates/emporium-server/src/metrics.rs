//! Hub metric names and the Prometheus exporter behind `GET /metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Sessions registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions unregistered (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Full-mailbox drops (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Rate-limited inbound frames (counter).
pub const WS_RATE_LIMITED_TOTAL: &str = "ws_rate_limited_total";
/// Malformed inbound envelopes (counter).
pub const WS_MALFORMED_FRAMES_TOTAL: &str = "ws_malformed_frames_total";
/// Slow consumers disconnected by drop escalation (counter).
pub const WS_SLOW_CONSUMER_KICKS_TOTAL: &str = "ws_slow_consumer_kicks_total";
/// Refused upgrades (counter, labels: reason).
pub const WS_UPGRADE_REJECTIONS_TOTAL: &str = "ws_upgrade_rejections_total";
/// Messages accepted by the chat service (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";

/// Session lifetimes span seconds to days.
const DURATION_BUCKETS: &[f64] = &[1.0, 10.0, 60.0, 300.0, 1_800.0, 3_600.0, 21_600.0, 86_400.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(WS_CONNECTION_DURATION_SECONDS.to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the process-wide recorder and describe every hub metric.
///
/// Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    describe_metrics();
    info!("prometheus recorder installed");
    Ok(handle)
}

/// Prometheus text exposition of everything recorded so far.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_metrics() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "Sessions registered with the hub");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "Sessions unregistered from the hub");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Live sessions");
    describe_histogram!(WS_CONNECTION_DURATION_SECONDS, Unit::Seconds, "Session lifetime");
    describe_counter!(WS_BROADCAST_DROPS_TOTAL, "Frames dropped on a full mailbox");
    describe_counter!(WS_RATE_LIMITED_TOTAL, "Inbound frames dropped by the rate limiter");
    describe_counter!(WS_MALFORMED_FRAMES_TOTAL, "Inbound frames with a malformed envelope");
    describe_counter!(WS_SLOW_CONSUMER_KICKS_TOTAL, "Sessions kicked for sustained drops");
    describe_counter!(WS_UPGRADE_REJECTIONS_TOTAL, "Refused upgrade requests by reason");
    describe_counter!(CHAT_MESSAGES_TOTAL, "Messages accepted by the chat service");
}
