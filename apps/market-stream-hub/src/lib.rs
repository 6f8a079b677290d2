#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Hub - Exchange Market Data Fan-out
//!
//! Maintains one combined-stream WebSocket connection to the exchange,
//! keeps the latest ticker state per symbol, fans every update out to
//! many downstream WebSocket subscribers, and periodically persists the
//! cached state.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core market data types and state
//!   - `streaming`: Snapshots, trades, candles, depth, broadcast envelopes
//!   - `subscription`: Instrument channels and routing keys
//!   - `cache`: Latest snapshot per symbol
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot store, envelope publisher and ticker source interfaces
//!   - `services`: Event routing, persistence flushing, ticker refresh, service facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Exchange WebSocket session, wire decoding, REST tickers
//!   - `broadcast`: Fan-out actor with per-subscriber queues
//!   - `downstream`: Subscriber WebSocket endpoint and control routes
//!   - `persistence`: In-memory and JSON lines snapshot stores
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────┐     ┌────────┐     ┌───────────┐
//! Exchange WS ──────►│ Upstream │────►│ Router │────►│ Broadcast │──► Subscriber 1
//! (combined stream)  │ Session  │     └───┬────┘     │    Hub    │──► Subscriber 2
//!                    └──────────┘         │          └───────────┘──► Subscriber N
//!                                         ▼
//!                                   ┌──────────┐     ┌─────────┐
//!                                   │  State   │────►│ Flusher │──► Snapshot store
//!                                   │  Cache   │     └─────────┘
//!                                   └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheUpdate, StalenessPolicy, StateCache};
pub use domain::streaming::{
    BroadcastEnvelope, CandleUpdate, DepthSnapshot, EnvelopeKind, MarketEvent, MarketSnapshot,
    MarketSummary, PriceLevel, SharedEnvelope, TradeTick,
};
pub use domain::subscription::{ChannelKind, InstrumentChannel, SubscriptionSet};

// Ports and services
pub use application::ports::{
    EnvelopePublisher, PersistenceError, PublishError, SnapshotStore, TickerSource,
    TickerSourceError,
};
pub use application::services::{
    MarketDataService, MarketDataServiceConfig, MarketEventRouter, PersistenceFlusher,
    RefreshReport, ServiceError, TickerRefresher,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, HubConfig, PersistenceBackend, ServerSettings};

// Upstream session
pub use infrastructure::upstream::{
    RestTickerClient, SessionConfig, SessionError, StreamCodec, UpstreamEvent, UpstreamSession,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, HubError, SharedBroadcastHub, Subscription,
};

// Downstream server
pub use infrastructure::downstream::{
    AppState, ConnectionConfig, DownstreamError, DownstreamServer,
};

// Persistence adapters
pub use infrastructure::persistence::{InMemorySnapshotStore, JsonlSnapshotStore, open_store};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
