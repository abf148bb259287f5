//! Server-wide stop signal and the bounded drain that follows it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The serve task finished on its own.
    Completed,
    /// The deadline passed; the serve task was aborted.
    Aborted,
}

/// Shared stop signal. Clones observe the same signal.
///
/// Once triggered, the upgrade handler refuses new sessions and the serve
/// task closes every live session before returning.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and give `server` until `timeout` to finish.
    pub async fn drain(&self, mut server: JoinHandle<()>, timeout: Duration) -> DrainOutcome {
        self.shutdown();
        match tokio::time::timeout(timeout, &mut server).await {
            Ok(_) => {
                info!("server drained");
                DrainOutcome::Completed
            }
            Err(_) => {
                warn!(?timeout, "server did not drain in time, aborting");
                server.abort();
                DrainOutcome::Aborted
            }
        }
    }
}
