//! SIGINT/SIGTERM handling.
//!
//! A signal cancels the shared token; the rotation worker notices at its
//! next checkpoint, removes what it was writing and releases the lock.

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long the worker gets to wind down after a signal
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Shutdown coordinator
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to the worker
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM, cancel the token and return the signal
    /// name. A handler that cannot be installed never fires.
    pub async fn wait_for_signal(&self) -> &'static str {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping the current run");
                self.token.cancel();
                "SIGINT"
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping the current run");
                self.token.cancel();
                "SIGTERM"
            }
            _ = self.token.cancelled() => "cancel",
        }
    }
}
