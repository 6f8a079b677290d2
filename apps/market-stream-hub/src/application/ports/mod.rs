//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotStore`: Durable persistence of snapshots, trades, candles
//!   and order books. Each call is independent; no transaction spans
//!   several calls and callers may retry at their discretion.
//! - `EnvelopePublisher`: Fan-out of broadcast envelopes to subscribers.
//! - `TickerSource`: Polled 24h ticker statistics used to seed the cache.

use async_trait::async_trait;

use crate::domain::streaming::{
    CandleUpdate, DepthSnapshot, MarketSnapshot, SharedEnvelope, TradeTick,
};

// =============================================================================
// Persistence
// =============================================================================

/// Errors returned by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Underlying I/O failure.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded.
    #[error("persistence encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The backing store rejected the record.
    #[error("store rejected record: {0}")]
    Rejected(String),
}

/// Durable store for market data records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the latest ticker snapshot for a symbol.
    async fn store_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), PersistenceError>;

    /// Persist a single trade.
    async fn store_trade(&self, trade: &TradeTick) -> Result<(), PersistenceError>;

    /// Persist a closed candle.
    async fn store_candle(&self, candle: &CandleUpdate) -> Result<(), PersistenceError>;

    /// Persist an order book snapshot.
    async fn store_order_book(&self, depth: &DepthSnapshot) -> Result<(), PersistenceError>;
}

// =============================================================================
// Broadcast
// =============================================================================

/// Errors returned when publishing to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The hub's control loop has stopped.
    #[error("broadcast hub is closed")]
    HubClosed,
}

/// Fan-out of envelopes to every registered subscriber.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// Publish an envelope to all current subscribers.
    async fn publish(&self, envelope: SharedEnvelope) -> Result<(), PublishError>;
}

// =============================================================================
// Ticker Polling
// =============================================================================

/// Errors returned by ticker sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerSourceError {
    /// The request never produced a response.
    #[error("ticker request failed: {0}")]
    Network(String),

    /// The exchange answered with a non-success status.
    #[error("ticker request rejected with status {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body was not a ticker list.
    #[error("ticker response could not be decoded: {0}")]
    Decode(String),
}

/// Source of 24h ticker statistics for every listed instrument.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickerSource: Send + Sync {
    /// Fetch the current 24h statistics for all instruments.
    async fn fetch_tickers(&self) -> Result<Vec<MarketSnapshot>, TickerSourceError>;
}
