//! Stream Codec Module
//!
//! Decodes combined-stream text frames into domain `MarketEvent`s.
//!
//! Each frame is `{"stream": "<routing key>", "data": {...}}`. The routing
//! key is split into symbol and channel, and the channel selects the
//! payload type:
//!
//! | Channel           | Payload          | Event    |
//! |-------------------|------------------|----------|
//! | `ticker`          | `TickerMessage`  | `Ticker` |
//! | `trade`           | `TradeMessage`   | `Trade`  |
//! | `kline_{i}`       | `KlineMessage`   | `Candle` |
//! | `depth{n}`        | `DepthMessage`   | `Depth`  |
//!
//! The symbol on the event always comes from the routing key, upper-cased.

use crate::domain::streaming::MarketEvent;
use crate::domain::subscription::{ChannelKind, InstrumentChannel, RoutingKeyError};
use crate::infrastructure::upstream::messages::{
    DepthMessage, KlineMessage, StreamEnvelope, TickerMessage, TradeMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Routing key is not `{symbol}@{channel}`.
    #[error(transparent)]
    RoutingKey(#[from] RoutingKeyError),

    /// Routing key names a channel this codec does not decode.
    #[error("unknown channel in stream: {0}")]
    UnknownChannel(String),
}

impl CodecError {
    /// Whether the frame was well formed but of a kind we ignore.
    #[must_use]
    pub const fn is_unknown_channel(&self) -> bool {
        matches!(self, Self::UnknownChannel(_))
    }
}

/// JSON codec for the combined market stream.
#[derive(Debug, Default, Clone)]
pub struct StreamCodec;

impl StreamCodec {
    /// Create a new stream codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one combined-stream text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownChannel` for well-formed frames on a
    /// channel that is not decoded, and any other variant for malformed
    /// frames.
    pub fn decode(&self, text: &str) -> Result<MarketEvent, CodecError> {
        let envelope: StreamEnvelope = serde_json::from_str(text)?;

        let channel = InstrumentChannel::parse_routing_key(&envelope.stream)?
            .ok_or_else(|| CodecError::UnknownChannel(envelope.stream.clone()))?;
        let symbol = channel.symbol;

        let event = match channel.kind {
            ChannelKind::Ticker => {
                let msg: TickerMessage = serde_json::from_value(envelope.data)?;
                MarketEvent::Ticker(msg.into_snapshot(symbol))
            }
            ChannelKind::Trade => {
                let msg: TradeMessage = serde_json::from_value(envelope.data)?;
                MarketEvent::Trade(msg.into_trade(symbol))
            }
            ChannelKind::Candle { .. } => {
                let msg: KlineMessage = serde_json::from_value(envelope.data)?;
                MarketEvent::Candle(msg.into_candle(symbol))
            }
            ChannelKind::Depth { .. } => {
                let msg: DepthMessage = serde_json::from_value(envelope.data)?;
                MarketEvent::Depth(msg.into_depth(symbol))
            }
        };

        Ok(event)
    }
}

// =============================================================================
// Tests
// =============================================================================
