//! Market Stream Hub Binary
//!
//! Starts the market data hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! All optional. The most common ones:
//! - `MARKET_SYMBOLS`: Comma-separated symbols (default: BTCUSDT,ETHUSDT,BNBUSDT,ADAUSDT,SOLUSDT)
//! - `UPSTREAM_BASE_URL`: Exchange stream endpoint (default: <wss://stream.binance.com:9443>)
//! - `UPSTREAM_AUTO_RECONNECT`: Redial after a dropped connection (default: false)
//! - `TICKER_REFRESH_SECS`: Poll REST 24h tickers into the cache (default: 0, off)
//! - `UPSTREAM_REST_URL`: Exchange REST endpoint (default: <https://api.binance.com>)
//! - `PERSISTENCE_BACKEND`: memory | jsonl (default: memory)
//! - `PERSISTENCE_DIR`: Directory for the jsonl backend (default: ./data)
//! - `HUB_HTTP_PORT`: Subscriber and control port (default: 8080)
//! - `HUB_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `HUB_AUTOSTART`: Start streaming on boot (default: true)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_stream_hub::infrastructure::broadcast::BroadcastHub;
use market_stream_hub::infrastructure::downstream::{AppState, DownstreamServer};
use market_stream_hub::infrastructure::health::{HealthServer, HealthServerState};
use market_stream_hub::infrastructure::telemetry;
use market_stream_hub::infrastructure::upstream::DEFAULT_REQUEST_TIMEOUT;
use market_stream_hub::{
    EnvelopePublisher, HubConfig, MarketDataService, MarketDataServiceConfig, RestTickerClient,
    StateCache, TickerSource, UpstreamSession, init_metrics, open_store,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for servers and tasks to wind down after a signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream Hub");

    let _metrics_handle = init_metrics()?;

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = open_store(&config.persistence).await?;
    let cache = Arc::new(StateCache::with_policy(config.staleness));
    let broadcast_hub = BroadcastHub::spawn(config.broadcast, shutdown_token.clone());
    let session = Arc::new(UpstreamSession::new(
        config.upstream.clone(),
        &config.symbols,
    ));

    let publisher: Arc<dyn EnvelopePublisher> = broadcast_hub.clone();
    let mut service = MarketDataService::new(
        session,
        cache,
        store,
        publisher,
        MarketDataServiceConfig {
            flush_interval: config.flush_interval,
            event_capacity: config.event_capacity,
            ticker_refresh: config.ticker_refresh,
        },
        shutdown_token.clone(),
    );
    if config.ticker_refresh.is_some() {
        let client: Arc<dyn TickerSource> = Arc::new(RestTickerClient::new(
            &config.rest_base_url,
            DEFAULT_REQUEST_TIMEOUT,
        )?);
        service = service.with_ticker_source(client);
    }
    let service = Arc::new(service);

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn subscriber and control server
    let app_state = Arc::new(AppState::new(
        Arc::clone(&service),
        Arc::clone(&broadcast_hub),
        config.subscriber,
        shutdown_token.clone(),
    ));
    let downstream_server =
        DownstreamServer::new(config.server.http_port, app_state, shutdown_token.clone());
    let downstream_task = tokio::spawn(async move {
        if let Err(e) = downstream_server.run().await {
            tracing::error!(error = %e, "Downstream server error");
        }
    });

    if config.autostart {
        // A failed first connect leaves the hub up so /market/start can retry.
        if let Err(e) = service.start().await {
            tracing::error!(error = %e, "Initial market data start failed");
        }
    }

    tracing::info!("Market Stream Hub ready");

    await_shutdown(shutdown_token).await;

    service.stop().await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(health_task, downstream_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Servers did not stop in time"
        );
    }

    tracing::info!("Market Stream Hub stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        symbols = ?config.symbols,
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        persistence = config.persistence.as_str(),
        staleness = config.staleness.as_str(),
        auto_reconnect = config.upstream.reconnect.enabled,
        ticker_refresh_secs = config.ticker_refresh.map(|interval| interval.as_secs()),
        autostart = config.autostart,
        "Configuration loaded"
    );
    tracing::debug!(
        base_url = %config.upstream.base_url,
        candle_interval = %config.upstream.candle_interval,
        depth_levels = config.upstream.depth_levels,
        flush_interval_secs = config.flush_interval.as_secs(),
        subscriber_queue = config.broadcast.subscriber_capacity,
        "Pipeline settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
