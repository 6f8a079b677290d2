//! Control Surface
//!
//! HTTP handlers sharing the downstream port with the subscriber socket.
//!
//! # Endpoints
//!
//! - `GET /ws/market` - WebSocket upgrade into the broadcast stream
//! - `POST /market/start` - Connect upstream and start streaming
//! - `POST /market/stop` - Stop streaming
//! - `GET /market/status` - Running flag, symbols, subscriber count
//! - `POST /market/symbols` - Track a symbol (`{"symbol": "BTCUSDT"}`)
//! - `GET /market/prices` - Every cached snapshot
//! - `GET /market/prices/{symbol}` - One cached snapshot
//! - `GET /market/summary` - Aggregate market summary

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionConfig, serve_subscriber};
use crate::application::services::{MarketDataService, ServiceError};
use crate::domain::streaming::{MarketSnapshot, MarketSummary};
use crate::infrastructure::broadcast::SharedBroadcastHub;

// =============================================================================
// State
// =============================================================================

/// Shared state behind every downstream route.
pub struct AppState {
    service: Arc<MarketDataService>,
    hub: SharedBroadcastHub,
    connection: ConnectionConfig,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create the shared state.
    #[must_use]
    pub const fn new(
        service: Arc<MarketDataService>,
        hub: SharedBroadcastHub,
        connection: ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            hub,
            connection,
            shutdown,
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Body of `POST /market/symbols`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddSymbolRequest {
    /// Symbol to track.
    pub symbol: String,
}

/// Reply to control commands.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    /// `success`, `info` or `error`.
    pub status: &'static str,
    /// Human-readable outcome.
    pub message: String,
    /// Symbol the command applied to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl CommandResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
            symbol: None,
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            status: "info",
            message: message.into(),
            symbol: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            symbol: None,
        }
    }

    fn with_symbol(mut self, symbol: String) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

/// Body of `GET /market/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Whether the upstream session is live.
    pub running: bool,
    /// Tracked symbols.
    pub symbols: Vec<String>,
    /// Symbols with a cached snapshot.
    pub price_count: usize,
    /// Registered downstream subscribers.
    pub subscribers: usize,
    /// Envelopes published since startup.
    pub published: u64,
    /// Subscribers dropped for falling behind.
    pub evicted: u64,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Body of `GET /market/prices`.
#[derive(Debug, Clone, Serialize)]
pub struct PricesResponse {
    /// Snapshots keyed by symbol.
    pub data: HashMap<String, MarketSnapshot>,
    /// Number of symbols.
    pub count: usize,
}

// =============================================================================
// Router
// =============================================================================

/// Build the downstream router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/market", get(subscribe_handler))
        .route("/market/start", post(start_handler))
        .route("/market/stop", post(stop_handler))
        .route("/market/status", get(status_handler))
        .route("/market/symbols", post(add_symbol_handler))
        .route("/market/prices", get(prices_handler))
        .route("/market/prices/{symbol}", get(price_handler))
        .route("/market/summary", get(summary_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let config = state.connection;
    let shutdown = state.shutdown.clone();

    ws.max_message_size(config.max_message_bytes)
        .on_upgrade(move |socket| serve_subscriber(socket, hub, config, shutdown))
}

async fn start_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<CommandResponse>) {
    match state.service.start().await {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandResponse::success("market data service started")),
        ),
        Err(ServiceError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(CommandResponse::info("market data service is already running")),
        ),
        Err(e @ ServiceError::Session(_)) => {
            tracing::error!(error = %e, "Start requested but upstream failed");
            (StatusCode::BAD_GATEWAY, Json(CommandResponse::error(e.to_string())))
        }
    }
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    if !state.service.is_running() {
        // still tears down tasks left from a dropped upstream
        state.service.stop().await;
        return Json(CommandResponse::info("market data service is not running"));
    }

    state.service.stop().await;
    Json(CommandResponse::success("market data service stopped"))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.hub.stats();
    Json(StatusResponse {
        running: state.service.is_running(),
        symbols: state.service.symbols(),
        price_count: state.service.snapshots().len(),
        subscribers: stats.subscribers,
        published: stats.published,
        evicted: stats.evicted,
        timestamp: Utc::now().timestamp(),
    })
}

async fn add_symbol_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddSymbolRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    let symbol = request.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(CommandResponse::error("symbol is required")),
        );
    }

    if state.service.add_symbol(&symbol) {
        let response =
            CommandResponse::success("symbol added; takes effect on next start").with_symbol(symbol);
        (StatusCode::CREATED, Json(response))
    } else {
        (
            StatusCode::OK,
            Json(CommandResponse::info("symbol already tracked").with_symbol(symbol)),
        )
    }
}

async fn prices_handler(State(state): State<Arc<AppState>>) -> Json<PricesResponse> {
    let data = state.service.snapshots();
    let count = data.len();
    Json(PricesResponse { data, count })
}

async fn price_handler(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    match state.service.snapshot(&symbol) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::error("symbol not found").with_symbol(symbol)),
        )
            .into_response(),
    }
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Json<MarketSummary> {
    Json(state.service.summary())
}
