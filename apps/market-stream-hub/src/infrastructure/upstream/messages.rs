//! Exchange WebSocket Message Types
//!
//! Wire format types for the exchange's combined-stream endpoint. Only the
//! fields needed to build domain events are declared; everything else in
//! a payload is ignored.
//!
//! # Combined Stream Envelope
//!
//! ```json
//! {"stream": "btcusdt@ticker", "data": {"e": "24hrTicker", ...}}
//! ```
//!
//! # Payloads
//!
//! - `24hrTicker`: rolling 24h statistics
//! - `trade`: individual trade
//! - `kline`: candle, with `k.x` marking a closed candle
//! - partial depth: `lastUpdateId` plus `bids`/`asks` as `[price, qty]`
//!
//! The REST `GET /api/v3/ticker/24hr` reply is a JSON array of
//! `RestTickerMessage`, used only to seed the cache.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{
    CandleUpdate, DepthSnapshot, MarketSnapshot, PriceLevel, TradeTick,
};

// =============================================================================
// Envelope
// =============================================================================

/// Outer frame of the combined stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Routing key, e.g. `btcusdt@kline_1m`.
    pub stream: String,
    /// Channel-specific payload.
    pub data: serde_json::Value,
}

// =============================================================================
// Ticker
// =============================================================================

/// 24h rolling window ticker event.
///
/// ```json
/// {
///   "e": "24hrTicker", "E": 1672515782136, "s": "BTCUSDT",
///   "p": "0.0015", "P": "250.00", "c": "0.0025", "b": "0.0024",
///   "a": "0.0026", "o": "0.0010", "h": "0.0025", "l": "0.0010",
///   "v": "10000", "q": "18"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Price change.
    #[serde(rename = "p")]
    pub price_change: Decimal,
    /// Price change percent.
    #[serde(rename = "P")]
    pub price_change_percent: Decimal,
    /// Last price.
    #[serde(rename = "c")]
    pub last_price: Decimal,
    /// Best bid price.
    #[serde(rename = "b")]
    pub best_bid_price: Decimal,
    /// Best ask price.
    #[serde(rename = "a")]
    pub best_ask_price: Decimal,
    /// Open price.
    #[serde(rename = "o")]
    pub open_price: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high_price: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low_price: Decimal,
    /// Total traded base asset volume.
    #[serde(rename = "v")]
    pub volume: Decimal,
    /// Total traded quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
}

impl TickerMessage {
    /// Convert to a domain snapshot stamped with the event time.
    #[must_use]
    pub fn into_snapshot(self, symbol: String) -> MarketSnapshot {
        MarketSnapshot {
            symbol,
            price: self.last_price,
            price_change: self.price_change,
            price_change_percent: self.price_change_percent,
            volume: self.volume,
            quote_volume: self.quote_volume,
            high: self.high_price,
            low: self.low_price,
            open_price: self.open_price,
            bid_price: self.best_bid_price,
            ask_price: self.best_ask_price,
            timestamp: millis_to_utc(self.event_time),
        }
    }
}

/// One entry of the REST 24h ticker list.
///
/// ```json
/// {
///   "symbol": "BTCUSDT", "priceChange": "-94.99", "priceChangePercent": "-0.95",
///   "lastPrice": "4.00", "bidPrice": "4.00", "askPrice": "4.00",
///   "openPrice": "99.00", "highPrice": "100.00", "lowPrice": "0.10",
///   "volume": "8913.30", "quoteVolume": "15.30", "closeTime": 1499869899040
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTickerMessage {
    /// Symbol.
    pub symbol: String,
    /// Price change.
    pub price_change: Decimal,
    /// Price change percent.
    pub price_change_percent: Decimal,
    /// Last price.
    pub last_price: Decimal,
    /// Best bid price.
    pub bid_price: Decimal,
    /// Best ask price.
    pub ask_price: Decimal,
    /// Open price.
    pub open_price: Decimal,
    /// High price.
    pub high_price: Decimal,
    /// Low price.
    pub low_price: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Quote asset volume.
    pub quote_volume: Decimal,
    /// End of the statistics window (ms).
    pub close_time: i64,
}

impl RestTickerMessage {
    /// Convert to a domain snapshot stamped with the window close time.
    #[must_use]
    pub fn into_snapshot(self) -> MarketSnapshot {
        MarketSnapshot {
            symbol: self.symbol,
            price: self.last_price,
            price_change: self.price_change,
            price_change_percent: self.price_change_percent,
            volume: self.volume,
            quote_volume: self.quote_volume,
            high: self.high_price,
            low: self.low_price,
            open_price: self.open_price,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            timestamp: millis_to_utc(self.close_time),
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Individual trade event.
///
/// ```json
/// {
///   "e": "trade", "E": 1672515782136, "s": "BNBBTC", "t": 12345,
///   "p": "0.001", "q": "100", "T": 1672515782136, "m": true, "M": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade ID.
    #[serde(rename = "t")]
    pub trade_id: u64,
    /// Price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Trade time (ms).
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Is the buyer the market maker?
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl TradeMessage {
    /// Convert to a domain trade.
    #[must_use]
    pub fn into_trade(self, symbol: String) -> TradeTick {
        TradeTick {
            symbol,
            trade_id: self.trade_id,
            price: self.price,
            quantity: self.quantity,
            trade_time: millis_to_utc(self.trade_time),
            is_buyer_maker: self.is_buyer_maker,
        }
    }
}

// =============================================================================
// Kline
// =============================================================================

/// Candlestick event wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineMessage {
    /// Event time (ms).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Candle body.
    #[serde(rename = "k")]
    pub kline: KlineBody,
}

/// Candle body of a kline event.
///
/// ```json
/// {
///   "t": 1672515780000, "T": 1672515839999, "s": "BNBBTC", "i": "1m",
///   "o": "0.0010", "c": "0.0020", "h": "0.0025", "l": "0.0015",
///   "v": "1000", "n": 100, "x": false, "q": "1.0000"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineBody {
    /// Open time (ms).
    #[serde(rename = "t")]
    pub open_time: i64,
    /// Close time (ms).
    #[serde(rename = "T")]
    pub close_time: i64,
    /// Interval.
    #[serde(rename = "i")]
    pub interval: String,
    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,
    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,
    /// Base asset volume.
    #[serde(rename = "v")]
    pub volume: Decimal,
    /// Number of trades.
    #[serde(rename = "n", default)]
    pub trade_count: u64,
    /// Is this kline closed?
    #[serde(rename = "x")]
    pub is_closed: bool,
    /// Quote asset volume.
    #[serde(rename = "q", default)]
    pub quote_volume: Decimal,
}

impl KlineMessage {
    /// Convert to a domain candle.
    #[must_use]
    pub fn into_candle(self, symbol: String) -> CandleUpdate {
        let k = self.kline;
        CandleUpdate {
            symbol,
            interval: k.interval,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            quote_volume: k.quote_volume,
            trade_count: k.trade_count,
            open_time: millis_to_utc(k.open_time),
            close_time: millis_to_utc(k.close_time),
            closed: k.is_closed,
        }
    }
}

// =============================================================================
// Depth
// =============================================================================

/// Partial book depth payload.
///
/// The partial stream carries no symbol or event time; both come from the
/// routing key and the local clock. Diff-depth payloads (`b`/`a`/`E`/`u`)
/// are accepted through aliases.
///
/// ```json
/// {"lastUpdateId": 160, "bids": [["0.0024", "10"]], "asks": [["0.0026", "100"]]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthMessage {
    /// Last update ID.
    #[serde(rename = "lastUpdateId", alias = "u", default)]
    pub last_update_id: u64,
    /// Event time (ms), absent on partial depth.
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    /// Bids as `[price, quantity]`.
    #[serde(alias = "b")]
    pub bids: Vec<(Decimal, Decimal)>,
    /// Asks as `[price, quantity]`.
    #[serde(alias = "a")]
    pub asks: Vec<(Decimal, Decimal)>,
}

impl DepthMessage {
    /// Convert to a domain depth snapshot.
    #[must_use]
    pub fn into_depth(self, symbol: String) -> DepthSnapshot {
        let to_levels = |levels: Vec<(Decimal, Decimal)>| {
            levels
                .into_iter()
                .map(|(price, quantity)| PriceLevel { price, quantity })
                .collect()
        };

        DepthSnapshot {
            symbol,
            bids: to_levels(self.bids),
            asks: to_levels(self.asks),
            last_update_id: self.last_update_id,
            timestamp: self.event_time.map_or_else(Utc::now, millis_to_utc),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Convert exchange milliseconds to UTC, clamping invalid values to the epoch.
#[must_use]
pub fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_deserialization_ignores_extra_fields() {
        let json = r#"{
            "e": "24hrTicker", "E": 1672515782136, "s": "BTCUSDT",
            "p": "100.5", "P": "0.15", "w": "65000", "x": "64900",
            "c": "65000.00", "Q": "0.01", "b": "64999.99", "B": "1",
            "a": "65000.01", "A": "2", "o": "64899.50", "h": "65500",
            "l": "64000", "v": "1234.5", "q": "80000000",
            "O": 0, "C": 86400000, "F": 0, "L": 18150, "n": 18151
        }"#;

        let msg: TickerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.symbol, "BTCUSDT");
        assert_eq!(msg.last_price.to_string(), "65000.00");
        assert_eq!(msg.best_bid_price.to_string(), "64999.99");
        assert_eq!(msg.best_ask_price.to_string(), "65000.01");

        let snapshot = msg.into_snapshot("BTCUSDT".to_string());
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_672_515_782_136);
        assert_eq!(snapshot.open_price.to_string(), "64899.50");
    }

    #[test]
    fn rest_ticker_conversion() {
        let json = r#"[{
            "symbol": "ETHUSDT", "priceChange": "-12.5", "priceChangePercent": "-0.41",
            "weightedAvgPrice": "3010", "prevClosePrice": "3020.1", "lastPrice": "3007.6",
            "lastQty": "0.2", "bidPrice": "3007.5", "bidQty": "4", "askPrice": "3007.7",
            "askQty": "3", "openPrice": "3020.1", "highPrice": "3050", "lowPrice": "2990",
            "volume": "120000", "quoteVolume": "361200000", "openTime": 1499783499040,
            "closeTime": 1499869899040, "firstId": 28385, "lastId": 28460, "count": 76
        }]"#;

        let mut tickers: Vec<RestTickerMessage> = serde_json::from_str(json).unwrap();
        let snapshot = tickers.remove(0).into_snapshot();

        assert_eq!(snapshot.symbol, "ETHUSDT");
        assert_eq!(snapshot.price.to_string(), "3007.6");
        assert_eq!(snapshot.bid_price.to_string(), "3007.5");
        assert_eq!(snapshot.price_change_percent.to_string(), "-0.41");
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_499_869_899_040);
    }

    #[test]
    fn trade_conversion() {
        let json = r#"{"e":"trade","E":1,"s":"BNBBTC","t":12345,"p":"0.001","q":"100","T":2,"m":true,"M":true}"#;
        let trade = serde_json::from_str::<TradeMessage>(json)
            .unwrap()
            .into_trade("BNBBTC".to_string());

        assert_eq!(trade.trade_id, 12345);
        assert!(trade.is_buyer_maker);
        assert_eq!(trade.trade_time.timestamp_millis(), 2);
    }

    #[test]
    fn kline_conversion() {
        let json = r#"{
            "e": "kline", "E": 1672515782136, "s": "BNBBTC",
            "k": {
                "t": 1672515780000, "T": 1672515839999, "s": "BNBBTC", "i": "1m",
                "f": 100, "L": 200, "o": "0.0010", "c": "0.0020", "h": "0.0025",
                "l": "0.0015", "v": "1000", "n": 100, "x": true, "q": "1.0000",
                "V": "500", "Q": "0.500", "B": "123456"
            }
        }"#;
        let candle = serde_json::from_str::<KlineMessage>(json)
            .unwrap()
            .into_candle("BNBBTC".to_string());

        assert!(candle.closed);
        assert_eq!(candle.interval, "1m");
        assert_eq!(candle.trade_count, 100);
        assert_eq!(candle.open_time.timestamp_millis(), 1_672_515_780_000);
    }

    #[test]
    fn partial_depth_conversion() {
        let json = r#"{"lastUpdateId":160,"bids":[["0.0024","10"],["0.0023","5"]],"asks":[["0.0026","100"]]}"#;
        let depth = serde_json::from_str::<DepthMessage>(json)
            .unwrap()
            .into_depth("BNBBTC".to_string());

        assert_eq!(depth.last_update_id, 160);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.asks[0].quantity.to_string(), "100");
    }

    #[test]
    fn diff_depth_aliases() {
        let json = r#"{"e":"depthUpdate","E":5,"s":"BNBBTC","U":157,"u":160,"b":[["1","2"]],"a":[]}"#;
        let depth = serde_json::from_str::<DepthMessage>(json)
            .unwrap()
            .into_depth("BNBBTC".to_string());

        assert_eq!(depth.last_update_id, 160);
        assert_eq!(depth.timestamp.timestamp_millis(), 5);
        assert_eq!(depth.bids.len(), 1);
    }

    #[test]
    fn invalid_millis_clamp_to_epoch() {
        assert_eq!(millis_to_utc(i64::MAX), DateTime::UNIX_EPOCH);
    }
}
