//! Instrument Subscription Types
//!
//! Domain types describing which (instrument, channel) pairs the upstream
//! session subscribes to.
//!
//! # Routing Keys
//!
//! Every upstream frame is tagged with a routing key of the form
//! `{symbol}@{channel}[_{param}]`, for example:
//!
//! - `btcusdt@ticker`
//! - `btcusdt@trade`
//! - `btcusdt@kline_1m`
//! - `btcusdt@depth20`
//!
//! `InstrumentChannel` renders to and parses from this form.

use std::fmt;

// =============================================================================
// Channel Kind
// =============================================================================

/// Default candle interval subscribed per symbol.
pub const DEFAULT_CANDLE_INTERVAL: &str = "1m";

/// Default partial order book depth subscribed per symbol.
pub const DEFAULT_DEPTH_LEVELS: u16 = 20;

/// A logical subscription kind for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Rolling 24h statistics.
    Ticker,
    /// Individual trade prints.
    Trade,
    /// Fixed-interval OHLCV candles.
    Candle {
        /// Candle interval (e.g. `1m`, `1h`).
        interval: String,
    },
    /// Partial order book depth.
    Depth {
        /// Number of price levels per side.
        levels: u16,
    },
}

impl ChannelKind {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Candle { .. } => "candle",
            Self::Depth { .. } => "depth",
        }
    }

    /// Parse the channel portion of a routing key.
    ///
    /// Returns `None` for channel kinds this service does not consume.
    #[must_use]
    pub fn parse(channel: &str) -> Option<Self> {
        match channel {
            "ticker" => Some(Self::Ticker),
            "trade" => Some(Self::Trade),
            _ => {
                if let Some(interval) = channel.strip_prefix("kline_") {
                    if interval.is_empty() {
                        return None;
                    }
                    return Some(Self::Candle {
                        interval: interval.to_string(),
                    });
                }

                let levels = channel.strip_prefix("depth")?;
                if levels.is_empty() {
                    return Some(Self::Depth {
                        levels: DEFAULT_DEPTH_LEVELS,
                    });
                }
                levels.parse().ok().map(|levels| Self::Depth { levels })
            }
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticker => f.write_str("ticker"),
            Self::Trade => f.write_str("trade"),
            Self::Candle { interval } => write!(f, "kline_{interval}"),
            Self::Depth { levels } => write!(f, "depth{levels}"),
        }
    }
}

// =============================================================================
// Instrument Channel
// =============================================================================

/// One logical upstream subscription: an instrument and a channel kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentChannel {
    /// Upper-case instrument symbol (e.g. `BTCUSDT`).
    pub symbol: String,
    /// Channel kind.
    pub kind: ChannelKind,
}

impl InstrumentChannel {
    /// Create a new instrument channel. The symbol is normalised to upper case.
    #[must_use]
    pub fn new(symbol: &str, kind: ChannelKind) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            kind,
        }
    }

    /// Stream name as used in the combined-stream URL.
    #[must_use]
    pub fn stream_name(&self) -> String {
        format!("{}@{}", self.symbol.to_lowercase(), self.kind)
    }

    /// Parse a routing key such as `btcusdt@kline_1m`.
    ///
    /// The key must contain exactly one `@`. Returns `Err` with the
    /// offending key when it is malformed and `Ok(None)` when the key is
    /// well formed but names a channel kind this service does not consume.
    ///
    /// # Errors
    ///
    /// Returns `RoutingKeyError` if the key is not of the form
    /// `{symbol}@{channel}`.
    pub fn parse_routing_key(key: &str) -> Result<Option<Self>, RoutingKeyError> {
        let mut parts = key.split('@');
        let (Some(symbol), Some(channel), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RoutingKeyError(key.to_string()));
        };

        if symbol.is_empty() || channel.is_empty() {
            return Err(RoutingKeyError(key.to_string()));
        }

        Ok(ChannelKind::parse(channel).map(|kind| Self::new(symbol, kind)))
    }
}

impl fmt::Display for InstrumentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_name())
    }
}

/// A routing key that could not be split into symbol and channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed routing key: {0}")]
pub struct RoutingKeyError(pub String);

/// Normalise a symbol to its canonical upper-case form.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The set of instruments the upstream session subscribes to.
///
/// Symbols keep insertion order and are de-duplicated case-insensitively.
/// Every symbol is expanded into the same channel template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: Vec<String>,
    template: Vec<ChannelKind>,
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new(Self::default_template())
    }
}

impl SubscriptionSet {
    /// Create an empty set using the given channel template.
    #[must_use]
    pub const fn new(template: Vec<ChannelKind>) -> Self {
        Self {
            symbols: Vec::new(),
            template,
        }
    }

    /// Ticker, trade, 1m candles and 20-level depth.
    #[must_use]
    pub fn default_template() -> Vec<ChannelKind> {
        Self::template_with(DEFAULT_CANDLE_INTERVAL, DEFAULT_DEPTH_LEVELS)
    }

    /// Ticker, trade, candles at `interval` and depth at `levels`.
    #[must_use]
    pub fn template_with(interval: &str, levels: u16) -> Vec<ChannelKind> {
        vec![
            ChannelKind::Ticker,
            ChannelKind::Trade,
            ChannelKind::Candle {
                interval: interval.to_string(),
            },
            ChannelKind::Depth { levels },
        ]
    }

    /// Add a symbol. Returns `false` if it was already present or blank.
    pub fn add_symbol(&mut self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() || self.symbols.contains(&symbol) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    /// Add many symbols, returning how many were new.
    pub fn extend<I, S>(&mut self, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        symbols
            .into_iter()
            .filter(|s| self.add_symbol(s.as_ref()))
            .count()
    }

    /// Check whether a symbol is present.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        self.symbols.contains(&symbol)
    }

    /// Subscribed symbols in insertion order.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if there are no symbols.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Expand every symbol into its instrument channels.
    #[must_use]
    pub fn channels(&self) -> Vec<InstrumentChannel> {
        self.symbols
            .iter()
            .flat_map(|symbol| {
                self.template
                    .iter()
                    .map(|kind| InstrumentChannel::new(symbol, kind.clone()))
            })
            .collect()
    }

    /// Stream names joined with `/` for the combined-stream URL.
    #[must_use]
    pub fn stream_path(&self) -> String {
        self.channels()
            .iter()
            .map(InstrumentChannel::stream_name)
            .collect::<Vec<_>>()
            .join("/")
    }
}

// =============================================================================
// Tests
// =============================================================================
