//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial user file only needs to
//! name the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmporiumSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Connection hub tuning.
    pub hub: HubSettings,
    /// Bearer credential validation.
    pub auth: AuthSettings,
    /// Upgrade origin allow-list.
    pub origins: OriginSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl EmporiumSettings {
    /// Reject combinations that would make the liveness policy unsound.
    pub fn validate(&self) -> Result<()> {
        if self.hub.mailbox_capacity == 0 {
            return Err(SettingsError::invalid("hub.mailboxCapacity", "must be at least 1"));
        }
        let ping = self.hub.ping_period_ms();
        if ping == 0 || ping >= self.hub.pong_wait_ms {
            return Err(SettingsError::invalid(
                "hub.pingPeriodMs",
                "must be non-zero and below hub.pongWaitMs",
            ));
        }
        if self.hub.max_message_size == 0 {
            return Err(SettingsError::invalid("hub.maxMessageSize", "must be non-zero"));
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Upgrade requests beyond this many live sessions are refused.
    pub max_connections: usize,
    /// Seconds to wait for in-flight work during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 10_000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Connection hub tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound queue slots per session.
    pub mailbox_capacity: usize,
    /// Inbound frames accepted per one-second window (`0` disables the limit).
    pub rate_limit_per_second: u32,
    /// Maximum time for a single write, in milliseconds.
    pub write_wait_ms: u64,
    /// Maximum inbound silence before a connection is presumed dead.
    pub pong_wait_ms: u64,
    /// Ping cadence; derived as 90% of `pong_wait_ms` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_period_ms: Option<u64>,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Deliver a sender's own messages back to the sending session.
    pub echo_to_sender: bool,
    /// Kick a recipient after this many consecutive mailbox-full drops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_drops: Option<u64>,
}

impl HubSettings {
    /// Effective ping period in milliseconds.
    pub fn ping_period_ms(&self) -> u64 {
        self.ping_period_ms
            .unwrap_or(self.pong_wait_ms / 10 * 9)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 2048,
            rate_limit_per_second: 10,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_period_ms: None,
            max_message_size: 100 * 1024,
            echo_to_sender: false,
            max_consecutive_drops: None,
        }
    }
}

/// Bearer credential validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret for HS256 tokens.
    pub jwt_secret: String,
    /// Required `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,
    /// Query parameter consulted when no `Authorization` header is present.
    pub token_query_param: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: None,
            token_query_param: "token".to_string(),
        }
    }
}

/// Upgrade origin allow-list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OriginSettings {
    /// Allowed `Origin` values; `"*"` allows all.
    pub allowed: Vec<String>,
    /// Accept requests that carry no `Origin` header (non-browser clients).
    pub allow_missing: bool,
}

impl Default for OriginSettings {
    fn default() -> Self {
        Self {
            allowed: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            allow_missing: true,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
