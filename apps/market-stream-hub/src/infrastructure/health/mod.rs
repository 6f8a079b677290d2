//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and
//! Prometheus metrics. Runs on its own port so probes keep answering even
//! when the downstream port is saturated with subscribers.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::MarketDataService;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream session status.
    pub upstream: UpstreamStatus,
    /// Downstream fan-out status.
    pub subscribers: SubscriberStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming with a live broadcast hub.
    Healthy,
    /// Serving cached data but not streaming.
    Degraded,
    /// Broadcast hub has stopped.
    Unhealthy,
}

/// Upstream session status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Whether the session is streaming.
    pub running: bool,
    /// Tracked symbols.
    pub symbols: usize,
    /// Symbols with a cached snapshot.
    pub cached_symbols: usize,
}

/// Downstream fan-out status.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStatus {
    /// Registered subscribers.
    pub active: usize,
    /// Envelopes published since startup.
    pub published: u64,
    /// Subscribers dropped for falling behind.
    pub evicted: u64,
    /// Whether the hub's control loop has stopped.
    pub hub_closed: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    service: Arc<MarketDataService>,
    broadcast_hub: SharedBroadcastHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        service: Arc<MarketDataService>,
        broadcast_hub: SharedBroadcastHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
            broadcast_hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, health_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let status = determine_health_status(
        state.service.is_running(),
        state.broadcast_hub.is_closed(),
    );

    if status == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let running = state.service.is_running();
    let hub_closed = state.broadcast_hub.is_closed();
    let stats = state.broadcast_hub.stats();

    HealthResponse {
        status: determine_health_status(running, hub_closed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            running,
            symbols: state.service.symbols().len(),
            cached_symbols: state.service.snapshots().len(),
        },
        subscribers: SubscriberStatus {
            active: stats.subscribers,
            published: stats.published,
            evicted: stats.evicted,
            hub_closed,
        },
    }
}

const fn determine_health_status(upstream_running: bool, hub_closed: bool) -> HealthStatus {
    match (upstream_running, hub_closed) {
        (_, true) => HealthStatus::Unhealthy,
        (true, false) => HealthStatus::Healthy,
        (false, false) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(true, false, HealthStatus::Healthy ; "streaming")]
    #[test_case(false, false, HealthStatus::Degraded ; "stopped")]
    #[test_case(true, true, HealthStatus::Unhealthy ; "hub closed while streaming")]
    #[test_case(false, true, HealthStatus::Unhealthy ; "hub closed while stopped")]
    fn determine_status(running: bool, hub_closed: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(running, hub_closed), expected);
    }
}
