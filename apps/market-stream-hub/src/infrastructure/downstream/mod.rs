//! Downstream Server
//!
//! Serves WebSocket subscribers and the control surface on one port.
//!
//! - `connection`: per-subscriber write/read tasks
//! - `control`: HTTP routes and the `/ws/market` upgrade

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub mod connection;
pub mod control;

pub use connection::{ConnectionConfig, SubscriberState, serve_subscriber};
pub use control::{AppState, router};

// =============================================================================
// Errors
// =============================================================================

/// Downstream server and connection errors.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),

    /// A frame could not be written to a subscriber.
    #[error("write failed: {0}")]
    Write(String),

    /// A frame write exceeded its deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for subscribers and control commands.
pub struct DownstreamServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl DownstreamServer {
    /// Create a new downstream server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), DownstreamError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DownstreamError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Downstream server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| DownstreamError::ServerFailed(e.to_string()))?;

        tracing::info!("Downstream server stopped");
        Ok(())
    }
}
