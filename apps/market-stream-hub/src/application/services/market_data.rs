//! Market Data Service
//!
//! Facade behind the control surface. Owns the lifecycle of one streaming
//! run: the upstream session, the event router, the persistence flusher
//! and the optional ticker refresher all hang off a child cancellation
//! token created per `start`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::flusher::{DEFAULT_FLUSH_INTERVAL, PersistenceFlusher};
use super::refresher::TickerRefresher;
use super::router::MarketEventRouter;
use crate::application::ports::{EnvelopePublisher, SnapshotStore, TickerSource};
use crate::domain::cache::StateCache;
use crate::domain::streaming::{MarketSnapshot, MarketSummary};
use crate::domain::subscription::normalize_symbol;
use crate::infrastructure::upstream::{SessionError, UpstreamEvent, UpstreamSession};

// =============================================================================
// Configuration
// =============================================================================

/// Settings for the market data service.
#[derive(Debug, Clone, Copy)]
pub struct MarketDataServiceConfig {
    /// Interval between persistence flushes.
    pub flush_interval: Duration,
    /// Capacity of the upstream event channel.
    pub event_capacity: usize,
    /// Interval between polled ticker refreshes; `None` disables polling.
    pub ticker_refresh: Option<Duration>,
}

impl Default for MarketDataServiceConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            event_capacity: 4096,
            ticker_refresh: None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by the service facade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// `start` was called while streaming.
    #[error("market data service is already running")]
    AlreadyRunning,

    /// The upstream session failed to start.
    #[error("failed to start upstream session: {0}")]
    Session(#[from] SessionError),
}

// =============================================================================
// Service
// =============================================================================

/// Control-surface facade over the streaming pipeline.
pub struct MarketDataService {
    session: Arc<UpstreamSession>,
    cache: Arc<StateCache>,
    store: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EnvelopePublisher>,
    ticker_source: Option<Arc<dyn TickerSource>>,
    config: MarketDataServiceConfig,
    shutdown: CancellationToken,
    run_token: Mutex<Option<CancellationToken>>,
}

impl MarketDataService {
    /// Create a new service. Nothing runs until `start` is called.
    #[must_use]
    pub fn new(
        session: Arc<UpstreamSession>,
        cache: Arc<StateCache>,
        store: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn EnvelopePublisher>,
        config: MarketDataServiceConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            cache,
            store,
            publisher,
            ticker_source: None,
            config,
            shutdown,
            run_token: Mutex::new(None),
        }
    }

    /// Poll `source` during each run when `ticker_refresh` is configured.
    #[must_use]
    pub fn with_ticker_source(mut self, source: Arc<dyn TickerSource>) -> Self {
        self.ticker_source = Some(source);
        self
    }

    /// Connect upstream and start routing and flushing.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::AlreadyRunning` if the upstream session is
    /// live, or `ServiceError::Session` if the connection cannot be opened.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut run_token = self.run_token.lock().await;

        if self.session.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        // tear down tasks left over from a run whose upstream died
        if let Some(previous) = run_token.take() {
            previous.cancel();
        }

        let token = self.shutdown.child_token();
        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(self.config.event_capacity);

        if let Err(e) = self.session.start(&token, event_tx).await {
            token.cancel();
            return Err(e.into());
        }

        let router = MarketEventRouter::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            Arc::clone(&self.publisher),
        );
        tokio::spawn(router.run(event_rx, token.clone()));

        let flusher = PersistenceFlusher::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            self.config.flush_interval,
        );
        tokio::spawn(flusher.run(token.clone()));

        let refresh = self.config.ticker_refresh.zip(self.ticker_source.as_ref());
        if let Some((interval, source)) = refresh {
            let refresher = TickerRefresher::new(
                Arc::clone(source),
                Arc::clone(&self.cache),
                self.session.symbols(),
                interval,
            );
            tokio::spawn(refresher.run(token.clone()));
        }

        *run_token = Some(token);

        tracing::info!(
            symbols = self.session.symbols().len(),
            flush_interval_secs = self.config.flush_interval.as_secs(),
            ticker_refresh = refresh.is_some(),
            "Market data service started"
        );
        Ok(())
    }

    /// Stop streaming. A no-op if not running.
    pub async fn stop(&self) {
        let mut run_token = self.run_token.lock().await;
        self.session.stop();
        if let Some(token) = run_token.take() {
            token.cancel();
            tracing::info!("Market data service stopped");
        }
    }

    /// Whether the upstream session is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Track a new symbol. Takes effect on the next `start`.
    ///
    /// Returns `false` if the symbol was already tracked.
    pub fn add_symbol(&self, symbol: &str) -> bool {
        let added = self.session.add_symbol(symbol);
        if added {
            tracing::info!(
                symbol = %normalize_symbol(symbol),
                running = self.is_running(),
                "Added symbol; takes effect on next start"
            );
        }
        added
    }

    /// Tracked symbols.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.session.symbols()
    }

    /// Latest snapshot for a symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.cache.get(&normalize_symbol(symbol))
    }

    /// Copy of every cached snapshot.
    #[must_use]
    pub fn snapshots(&self) -> HashMap<String, MarketSnapshot> {
        self.cache.list_all()
    }

    /// Aggregate market summary.
    #[must_use]
    pub fn summary(&self) -> MarketSummary {
        let snapshots = self.cache.list_all();
        MarketSummary::from_snapshots(snapshots.values(), self.is_running())
    }
}

// =============================================================================
// Tests
// =============================================================================
