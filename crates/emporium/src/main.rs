//! # emporium
//!
//! Emporium messaging hub binary. Loads settings, installs logging and the
//! metrics recorder, then serves the hub until ctrl-c.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use emporium_server::auth::{JwtAuthenticator, issue_token};
use emporium_server::chat::InMemoryChatService;
use emporium_server::config::ServerConfig;
use emporium_server::ids::UserId;
use emporium_server::server::HubServer;
use emporium_server::shutdown::DrainOutcome;
use emporium_settings::EmporiumSettings;
use tracing::{info, warn};

/// Emporium real-time messaging hub.
#[derive(Parser, Debug)]
#[command(name = "emporium", about = "Emporium messaging hub")]
struct Cli {
    /// Settings file (defaults to `~/.emporium/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a signed token for local testing.
    Token {
        /// Subject of the token.
        #[arg(long)]
        user: String,

        /// Lifetime in seconds.
        #[arg(long, default_value = "3600")]
        ttl: i64,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<EmporiumSettings> {
        let mut settings = match &self.settings {
            Some(path) => emporium_settings::load_settings_required(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => emporium_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // The global subscriber depends on settings; cover the load itself.
    let settings = logging::with_bootstrap(cli.log_json, || cli.load_settings())?;

    if settings.auth.jwt_secret.is_empty() {
        bail!("auth.jwtSecret is empty; set it in settings or EMPORIUM_JWT_SECRET");
    }
    let secret = settings.auth.jwt_secret.as_bytes();
    let issuer = settings.auth.jwt_issuer.as_deref();

    if let Some(Command::Token { user, ttl }) = &cli.command {
        let token = issue_token(secret, &UserId::from(user.as_str()), *ttl, issuer)
            .context("Failed to sign token")?;
        println!("{token}");
        return Ok(());
    }

    let _ = logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let config = ServerConfig::from(&settings);
    let chat = Arc::new(InMemoryChatService::new(true));
    let auth = Arc::new(JwtAuthenticator::new(secret, issuer));
    let mut server = HubServer::new(config, chat, auth);
    match emporium_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("emporium listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down...");
    match server.shutdown_gracefully(handle).await {
        DrainOutcome::Completed => info!("shutdown complete"),
        DrainOutcome::Aborted => warn!("shutdown timed out, serve task aborted"),
    }
    Ok(())
}
