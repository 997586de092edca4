use axum::Router;
use std::net::SocketAddr;
use tracing::{error, info};

use huddle_api::{create_router, AppState};

/// HTTP server hosting the health check and the signaling socket
pub struct HuddleServer {
    http_address: String,
    router: Router,
}

impl HuddleServer {
    pub fn new(http_address: String, state: AppState) -> Self {
        Self {
            http_address,
            router: create_router(state),
        }
    }

    /// Serve until Ctrl+C/SIGTERM, then let open requests finish
    pub async fn start(self) -> anyhow::Result<()> {
        let http_addr: SocketAddr = self
            .http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.http_address))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        info!("HTTP server listening on {}", http_addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                info!("Shutdown signal received, starting graceful shutdown...");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
