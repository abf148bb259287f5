//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use emporium_settings::{EmporiumSettings, HubSettings};

use crate::errors::ServerError;
use crate::origin::OriginPolicy;
use crate::websocket::heartbeat::HeartbeatPolicy;
use crate::websocket::HubConfig;

/// Configuration for the HTTP/WebSocket server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Upgrades beyond this many live sessions are refused.
    pub max_connections: usize,
    /// Allowed `Origin` values (`"*"` for any).
    pub allowed_origins: Vec<String>,
    /// Admit upgrade requests with no `Origin` header.
    pub allow_missing_origin: bool,
    /// Query parameter carrying the bearer credential.
    pub token_query_param: String,
    /// Bound on graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Hub tuning.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            allowed_origins: vec!["*".into()],
            allow_missing_origin: true,
            token_query_param: "token".into(),
            shutdown_timeout: Duration::from_secs(10),
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Origin policy built from the allow-list.
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::new(&self.allowed_origins, self.allow_missing_origin)
    }

    /// Listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Address(format!("{}:{}: {e}", self.host, self.port)))
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(hub: &HubSettings) -> Self {
        Self {
            mailbox_capacity: hub.mailbox_capacity,
            rate_limit_per_second: hub.rate_limit_per_second,
            heartbeat: HeartbeatPolicy {
                write_wait: Duration::from_millis(hub.write_wait_ms),
                pong_wait: Duration::from_millis(hub.pong_wait_ms),
                ping_period: Duration::from_millis(hub.ping_period_ms()),
                max_message_size: hub.max_message_size,
            },
            echo_to_sender: hub.echo_to_sender,
            max_consecutive_drops: hub.max_consecutive_drops,
        }
    }
}

impl From<&EmporiumSettings> for ServerConfig {
    fn from(settings: &EmporiumSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            allowed_origins: settings.origins.allowed.clone(),
            allow_missing_origin: settings.origins.allow_missing,
            token_query_param: settings.auth.token_query_param.clone(),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            hub: HubConfig::from(&settings.hub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.socket_addr().unwrap().to_string(), "127.0.0.1:0");
    }

    #[test]
    fn invalid_host_is_address_error() {
        let cfg = ServerConfig {
            host: "not a host".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.socket_addr(), Err(ServerError::Address(_))));
    }

    #[test]
    fn settings_convert() {
        let mut settings = EmporiumSettings::default();
        settings.hub.pong_wait_ms = 30_000;
        settings.hub.rate_limit_per_second = 0;
        settings.origins.allowed = vec!["https://shop.example".into()];

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.hub.rate_limit_per_second, 0);
        assert_eq!(cfg.hub.heartbeat.pong_wait, Duration::from_secs(30));
        assert_eq!(cfg.hub.heartbeat.ping_period, Duration::from_secs(27));
        assert_eq!(cfg.hub.mailbox_capacity, 2048);
        assert!(cfg.hub.heartbeat.is_sound());
        assert!(cfg.origin_policy().is_allowed(Some("https://shop.example")));
        assert!(!cfg.origin_policy().is_allowed(Some("https://evil.example")));
    }

    #[test]
    fn default_settings_match_hub_defaults() {
        let from_settings = HubConfig::from(&EmporiumSettings::default().hub);
        assert_eq!(from_settings, HubConfig::default());
    }
}
