//! Graceful Shutdown Module
//!
//! Runs a set of servers side by side and stops them together when a
//! shutdown signal arrives or one of them fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::RuntimeError;
use crate::server::StoppableServer;

/// Starts servers and coordinates their shutdown.
pub struct Supervisor {
    servers: Vec<Arc<dyn StoppableServer>>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("servers", &self.servers.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Supervisor {
    /// Supervisor giving servers `shutdown_timeout` to drain before they are
    /// stopped forcibly
    #[must_use]
    pub const fn new(shutdown_timeout: Duration) -> Self {
        Self {
            servers: Vec::new(),
            shutdown_timeout,
        }
    }

    /// Add a server
    #[must_use]
    pub fn with_server(mut self, server: Arc<dyn StoppableServer>) -> Self {
        self.servers.push(server);
        self
    }

    /// Servers under supervision
    #[must_use]
    pub fn servers(&self) -> &[Arc<dyn StoppableServer>] {
        &self.servers
    }

    /// Start every server and serve until `signal` completes or a server
    /// exits, then stop them all.
    ///
    /// # Errors
    ///
    /// The first error returned by a server, typically a bind failure.
    pub async fn run<F>(self, signal: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut tasks = JoinSet::new();
        for server in &self.servers {
            let server = Arc::clone(server);
            tasks.spawn(async move {
                let result = server.start().await;
                (server.name().to_string(), result)
            });
        }

        let mut first_error = None;
        tokio::select! {
            () = signal => info!("Shutdown signal received"),
            Some(joined) = tasks.join_next() => {
                first_error = server_exit(joined);
                warn!("A server exited, stopping the others");
            }
        }

        self.stop_all().await;

        while let Some(joined) = tasks.join_next().await {
            let err = server_exit(joined);
            if first_error.is_none() {
                first_error = err;
            }
        }

        info!("Shutdown complete");
        first_error.map_or(Ok(()), Err)
    }

    async fn stop_all(&self) {
        info!(servers = self.servers.len(), "Initiating graceful shutdown");
        let graceful = join_all(self.servers.iter().map(|server| server.graceful_stop()));
        if tokio::time::timeout(self.shutdown_timeout, graceful).await.is_err() {
            warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Shutdown timeout reached, stopping remaining servers"
            );
            join_all(self.servers.iter().map(|server| server.stop())).await;
        }
    }
}

fn server_exit(
    joined: Result<(String, Result<(), RuntimeError>), tokio::task::JoinError>,
) -> Option<RuntimeError> {
    match joined {
        Ok((name, Ok(()))) => {
            info!(server = %name, "Server exited");
            None
        }
        Ok((name, Err(e))) => {
            error!(server = %name, error = %e, "Server failed");
            Some(e)
        }
        Err(e) => {
            error!(error = %e, "Server task failed");
            Some(RuntimeError::Serve {
                name: "unknown".to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Waits for SIGTERM or SIGINT
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
