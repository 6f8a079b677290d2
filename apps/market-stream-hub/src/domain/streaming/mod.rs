//! Market Data Streaming Types
//!
//! Core domain types for market data: ticker snapshots, trades, candles
//! and order book depth. These types are codec-agnostic and represent the
//! canonical internal representation of market data, independent of the
//! exchange wire format. Prices and quantities are held as `Decimal` and
//! serialised as JSON numbers.
//!
//! # Broadcast Envelope
//!
//! Every update fanned out to downstream subscribers is wrapped in a
//! `BroadcastEnvelope`, serialised as:
//!
//! ```json
//! {
//!   "type": "ticker",
//!   "symbol": "BTCUSDT",
//!   "data": { "symbol": "BTCUSDT", "price": 65000.0, ... },
//!   "timestamp": "2024-01-15T14:30:00Z"
//! }
//! ```

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Market Data
// =============================================================================

/// Latest known 24h state for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    /// Instrument symbol.
    pub symbol: String,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Absolute 24h price change.
    #[serde(with = "rust_decimal::serde::float")]
    pub price_change: Decimal,
    /// 24h price change in percent.
    #[serde(with = "rust_decimal::serde::float")]
    pub price_change_percent: Decimal,
    /// 24h base asset volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub volume: Decimal,
    /// 24h quote asset volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub quote_volume: Decimal,
    /// 24h high.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// 24h low.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Price 24h ago.
    #[serde(with = "rust_decimal::serde::float")]
    pub open_price: Decimal,
    /// Best bid price.
    #[serde(with = "rust_decimal::serde::float")]
    pub bid_price: Decimal,
    /// Best ask price.
    #[serde(with = "rust_decimal::serde::float")]
    pub ask_price: Decimal,
    /// Exchange event time of this snapshot.
    pub timestamp: DateTime<Utc>,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTick {
    /// Instrument symbol.
    pub symbol: String,
    /// Exchange trade ID.
    pub trade_id: u64,
    /// Trade price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Trade quantity.
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    /// Trade execution time.
    pub trade_time: DateTime<Utc>,
    /// Whether the buyer was the maker (i.e. the taker sold).
    pub is_buyer_maker: bool,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Resting quantity at this price.
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
}

/// Partial order book for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Instrument symbol.
    pub symbol: String,
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
    /// Exchange order book update ID.
    pub last_update_id: u64,
    /// Time the book was observed.
    pub timestamp: DateTime<Utc>,
}

impl DepthSnapshot {
    /// Number of levels on the deeper side.
    #[must_use]
    pub fn depth_level(&self) -> usize {
        self.bids.len().max(self.asks.len())
    }
}

/// A fixed-interval OHLCV candle, possibly still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleUpdate {
    /// Instrument symbol.
    pub symbol: String,
    /// Candle interval (e.g. `1m`).
    pub interval: String,
    /// Open price.
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    /// High price.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Low price.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Close (or latest) price.
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    /// Base asset volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub volume: Decimal,
    /// Quote asset volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub quote_volume: Decimal,
    /// Number of trades.
    pub trade_count: u64,
    /// Candle open time.
    pub open_time: DateTime<Utc>,
    /// Candle close time.
    pub close_time: DateTime<Utc>,
    /// Whether this candle is final.
    pub closed: bool,
}

/// A decoded upstream market data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    /// 24h ticker statistics.
    Ticker(MarketSnapshot),
    /// Individual trade.
    Trade(TradeTick),
    /// Candle update.
    Candle(CandleUpdate),
    /// Partial order book.
    Depth(DepthSnapshot),
}

impl MarketEvent {
    /// Symbol this event belongs to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(s) => &s.symbol,
            Self::Trade(t) => &t.symbol,
            Self::Candle(c) => &c.symbol,
            Self::Depth(d) => &d.symbol,
        }
    }

    /// Envelope type tag for this event.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Ticker(_) => EnvelopeKind::Ticker,
            Self::Trade(_) => EnvelopeKind::Trade,
            Self::Candle(_) => EnvelopeKind::Kline,
            Self::Depth(_) => EnvelopeKind::Depth,
        }
    }
}

// =============================================================================
// Broadcast Envelope
// =============================================================================

/// Type tag of a broadcast envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Ticker snapshot.
    Ticker,
    /// Trade print.
    Trade,
    /// Candle update.
    Kline,
    /// Order book depth.
    Depth,
}

impl EnvelopeKind {
    /// Tag as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Kline => "kline",
            Self::Depth => "depth",
        }
    }
}

/// Immutable unit placed on every subscriber queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Instrument symbol, if the payload concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Payload.
    pub data: serde_json::Value,
    /// Time the envelope was created.
    pub timestamp: DateTime<Utc>,
    /// Extra tags (candle interval, closed flag).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Wire text, filled by the first subscriber that sends this envelope.
    #[serde(skip)]
    encoded: OnceLock<Arc<str>>,
}

/// Envelope shared read-only across subscriber queues.
pub type SharedEnvelope = Arc<BroadcastEnvelope>;

impl BroadcastEnvelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: EnvelopeKind, symbol: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            symbol,
            data,
            timestamp: Utc::now(),
            metadata: None,
            encoded: OnceLock::new(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build the envelope for a decoded market event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialised.
    pub fn from_event(event: &MarketEvent) -> Result<Self, serde_json::Error> {
        let symbol = Some(event.symbol().to_string());
        let envelope = match event {
            MarketEvent::Ticker(snapshot) => {
                Self::new(EnvelopeKind::Ticker, symbol, serde_json::to_value(snapshot)?)
            }
            MarketEvent::Trade(trade) => {
                Self::new(EnvelopeKind::Trade, symbol, serde_json::to_value(trade)?)
            }
            MarketEvent::Depth(depth) => {
                Self::new(EnvelopeKind::Depth, symbol, serde_json::to_value(depth)?)
            }
            MarketEvent::Candle(candle) => {
                Self::new(EnvelopeKind::Kline, symbol, serde_json::to_value(candle)?)
                    .with_metadata(serde_json::json!({
                        "interval": candle.interval,
                        "closed": candle.closed,
                    }))
            }
        };
        Ok(envelope)
    }

    /// Serialise to the JSON text sent to subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// JSON text shared by every subscriber queue holding this envelope.
    ///
    /// Serialised once; later calls return the cached text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn encoded(&self) -> Result<Arc<str>, serde_json::Error> {
        if let Some(text) = self.encoded.get() {
            return Ok(Arc::clone(text));
        }
        let text: Arc<str> = self.to_json()?.into();
        Ok(Arc::clone(self.encoded.get_or_init(|| text)))
    }
}

// =============================================================================
// Market Summary
// =============================================================================

/// Percent change beyond which a symbol counts as a major mover.
pub const MAJOR_MOVE_PERCENT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Aggregate view over every cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSummary {
    /// Number of cached symbols.
    pub total_symbols: usize,
    /// Sum of 24h quote volume.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_volume: Decimal,
    /// Mean 24h price change percent.
    #[serde(with = "rust_decimal::serde::float")]
    pub avg_price_change: Decimal,
    /// Symbols up more than 5%.
    pub major_gainers: Vec<MarketSnapshot>,
    /// Symbols down more than 5%.
    pub major_losers: Vec<MarketSnapshot>,
    /// Whether the upstream stream is running.
    pub service_running: bool,
    /// Time the summary was computed.
    pub last_updated: DateTime<Utc>,
}

impl MarketSummary {
    /// Aggregate a set of snapshots.
    #[must_use]
    pub fn from_snapshots<'a, I>(snapshots: I, service_running: bool) -> Self
    where
        I: IntoIterator<Item = &'a MarketSnapshot>,
    {
        let mut total_symbols = 0usize;
        let mut total_volume = Decimal::ZERO;
        let mut change_sum = Decimal::ZERO;
        let mut major_gainers = Vec::new();
        let mut major_losers = Vec::new();

        for snapshot in snapshots {
            total_symbols += 1;
            total_volume += snapshot.quote_volume;
            change_sum += snapshot.price_change_percent;

            if snapshot.price_change_percent > MAJOR_MOVE_PERCENT {
                major_gainers.push(snapshot.clone());
            } else if snapshot.price_change_percent < -MAJOR_MOVE_PERCENT {
                major_losers.push(snapshot.clone());
            }
        }

        let avg_price_change = if total_symbols == 0 {
            Decimal::ZERO
        } else {
            change_sum / Decimal::from(total_symbols)
        };

        major_gainers.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        major_losers.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Self {
            total_symbols,
            total_volume,
            avg_price_change,
            major_gainers,
            major_losers,
            service_running,
            last_updated: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn snapshot(symbol: &str, change_percent: Decimal, quote_volume: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            price: dec("100"),
            price_change: Decimal::ZERO,
            price_change_percent: change_percent,
            volume: dec("10"),
            quote_volume,
            high: dec("110"),
            low: dec("90"),
            open_price: dec("100"),
            bid_price: dec("99.9"),
            ask_price: dec("100.1"),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn envelope_serialization_ticker() {
        let event = MarketEvent::Ticker(snapshot("BTCUSDT", dec("1.5"), dec("1000")));
        let envelope = BroadcastEnvelope::from_event(&event).unwrap();
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "ticker");
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["data"]["priceChangePercent"], 1.5);
        assert!(json["data"]["price"].is_number());
        assert!(json.get("metadata").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn encoded_text_is_shared_across_callers() {
        let event = MarketEvent::Ticker(snapshot("ETHUSDT", dec("-2.25"), dec("500")));
        let envelope = Arc::new(BroadcastEnvelope::from_event(&event).unwrap());

        let first = envelope.encoded().unwrap();
        let second = Arc::clone(&envelope).encoded().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*first, envelope.to_json().unwrap());
        assert!(!first.contains("encoded"));
    }

    #[test]
    fn envelope_without_symbol_omits_field() {
        let envelope =
            BroadcastEnvelope::new(EnvelopeKind::Ticker, None, serde_json::json!({"x": 1}));
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert!(json.get("symbol").is_none());
    }

    #[test]
    fn candle_envelope_carries_metadata() {
        let candle = CandleUpdate {
            symbol: "ETHUSDT".to_string(),
            interval: "1m".to_string(),
            open: dec("3000"),
            high: dec("3010"),
            low: dec("2990"),
            close: dec("3005"),
            volume: dec("12.5"),
            quote_volume: dec("37500"),
            trade_count: 42,
            open_time: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            close_time: Utc.timestamp_millis_opt(1_700_000_059_999).unwrap(),
            closed: false,
        };
        let envelope = BroadcastEnvelope::from_event(&MarketEvent::Candle(candle)).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Kline);
        assert_eq!(
            envelope.metadata,
            Some(serde_json::json!({"interval": "1m", "closed": false}))
        );
    }

    #[test]
    fn event_kind_and_symbol() {
        let event = MarketEvent::Trade(TradeTick {
            symbol: "SOLUSDT".to_string(),
            trade_id: 7,
            price: dec("150"),
            quantity: dec("2"),
            trade_time: Utc::now(),
            is_buyer_maker: true,
        });
        assert_eq!(event.kind(), EnvelopeKind::Trade);
        assert_eq!(event.symbol(), "SOLUSDT");
        assert_eq!(EnvelopeKind::Kline.as_str(), "kline");
    }

    #[test]
    fn summary_aggregates() {
        let snapshots = [
            snapshot("BTCUSDT", dec("6"), dec("100")),
            snapshot("ETHUSDT", dec("-7"), dec("50")),
            snapshot("SOLUSDT", dec("4"), dec("25")),
        ];
        let summary = MarketSummary::from_snapshots(&snapshots, true);

        assert_eq!(summary.total_symbols, 3);
        assert_eq!(summary.total_volume, dec("175"));
        assert_eq!(summary.avg_price_change, dec("1"));
        assert_eq!(summary.major_gainers.len(), 1);
        assert_eq!(summary.major_gainers[0].symbol, "BTCUSDT");
        assert_eq!(summary.major_losers[0].symbol, "ETHUSDT");
        assert!(summary.service_running);
    }

    #[test]
    fn summary_empty() {
        let summary = MarketSummary::from_snapshots(std::iter::empty(), false);
        assert_eq!(summary.total_symbols, 0);
        assert_eq!(summary.avg_price_change, Decimal::ZERO);
        assert!(!summary.service_running);
    }

    #[test]
    fn depth_level_uses_deeper_side() {
        let level = PriceLevel {
            price: dec("1"),
            quantity: dec("1"),
        };
        let depth = DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            bids: vec![level; 3],
            asks: vec![level; 5],
            last_update_id: 1,
            timestamp: Utc::now(),
        };
        assert_eq!(depth.depth_level(), 5);
    }
}
