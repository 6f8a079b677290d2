//! Hub Configuration Settings
//!
//! Configuration types for the market stream hub, loaded from environment
//! variables. Every variable is optional; unparseable numeric values fall
//! back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::cache::StalenessPolicy;
use crate::infrastructure::broadcast::BroadcastConfig;
use crate::infrastructure::downstream::ConnectionConfig;
use crate::infrastructure::upstream::{
    DEFAULT_BASE_URL, DEFAULT_REST_URL, HeartbeatConfig, ReconnectConfig, SessionConfig,
};

/// Symbols tracked when `MARKET_SYMBOLS` is unset.
pub const DEFAULT_SYMBOLS: [&str; 5] = ["BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "SOLUSDT"];

/// Where persisted records go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersistenceBackend {
    /// Process-local store; contents are lost on exit.
    #[default]
    Memory,
    /// Append-only JSON lines files under a directory.
    Jsonl {
        /// Output directory.
        dir: PathBuf,
    },
}

impl PersistenceBackend {
    /// Parse a backend name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unknown names.
    pub fn parse(name: &str, dir: PathBuf) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "memory" | "" => Ok(Self::Memory),
            "jsonl" => Ok(Self::Jsonl { dir }),
            other => Err(ConfigError::InvalidValue {
                key: "PERSISTENCE_BACKEND".to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl { .. } => "jsonl",
        }
    }
}

/// HTTP port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port serving the subscriber endpoint and control routes.
    pub http_port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Symbols tracked at startup.
    pub symbols: Vec<String>,
    /// Upstream session settings.
    pub upstream: SessionConfig,
    /// Exchange REST endpoint for polled tickers.
    pub rest_base_url: String,
    /// Interval between polled ticker refreshes; `None` when disabled.
    pub ticker_refresh: Option<Duration>,
    /// Capacity of the upstream event channel.
    pub event_capacity: usize,
    /// Broadcast hub capacities.
    pub broadcast: BroadcastConfig,
    /// Downstream connection timings.
    pub subscriber: ConnectionConfig,
    /// Interval between snapshot flushes.
    pub flush_interval: Duration,
    /// How out-of-order tickers are treated.
    pub staleness: StalenessPolicy,
    /// Persistence backend.
    pub persistence: PersistenceBackend,
    /// Port settings.
    pub server: ServerSettings,
    /// Start streaming as soon as the process is up.
    pub autostart: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
            upstream: SessionConfig::default(),
            rest_base_url: DEFAULT_REST_URL.to_string(),
            ticker_refresh: None,
            event_capacity: 4_096,
            broadcast: BroadcastConfig::default(),
            subscriber: ConnectionConfig::default(),
            flush_interval: Duration::from_secs(10),
            staleness: StalenessPolicy::default(),
            persistence: PersistenceBackend::default(),
            server: ServerSettings::default(),
            autostart: true,
        }
    }
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_SYMBOLS` is set but lists no symbols, or
    /// if `PERSISTENCE_BACKEND` names an unknown backend.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`HubConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let symbols = match env.get("MARKET_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => defaults.symbols,
        };

        let heartbeat = HeartbeatConfig::new(
            env.secs("UPSTREAM_PING_INTERVAL_SECS", defaults.upstream.heartbeat.ping_interval),
            env.secs("UPSTREAM_PONG_TIMEOUT_SECS", defaults.upstream.heartbeat.pong_timeout),
        );

        let reconnect_defaults = defaults.upstream.reconnect;
        let reconnect = ReconnectConfig {
            enabled: env.parse("UPSTREAM_AUTO_RECONNECT", reconnect_defaults.enabled),
            initial_delay: env.millis(
                "UPSTREAM_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.initial_delay,
            ),
            max_delay: env.secs(
                "UPSTREAM_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.max_delay,
            ),
            multiplier: env.parse(
                "UPSTREAM_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.multiplier,
            ),
            jitter_factor: reconnect_defaults.jitter_factor,
            max_attempts: env.parse(
                "UPSTREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let upstream = SessionConfig {
            base_url: env
                .get("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            candle_interval: env
                .get("UPSTREAM_CANDLE_INTERVAL")
                .unwrap_or(defaults.upstream.candle_interval),
            depth_levels: env.parse("UPSTREAM_DEPTH_LEVELS", defaults.upstream.depth_levels),
            heartbeat,
            reconnect,
        };

        let broadcast = BroadcastConfig {
            command_capacity: env.parse("HUB_COMMAND_CAPACITY", defaults.broadcast.command_capacity),
            subscriber_capacity: env.parse(
                "HUB_SUBSCRIBER_QUEUE_CAPACITY",
                defaults.broadcast.subscriber_capacity,
            ),
        };

        let subscriber = ConnectionConfig {
            ping_interval: env.secs(
                "SUBSCRIBER_PING_INTERVAL_SECS",
                defaults.subscriber.ping_interval,
            ),
            pong_wait: env.secs("SUBSCRIBER_PONG_WAIT_SECS", defaults.subscriber.pong_wait),
            write_timeout: env.secs(
                "SUBSCRIBER_WRITE_TIMEOUT_SECS",
                defaults.subscriber.write_timeout,
            ),
            max_message_bytes: env.parse(
                "SUBSCRIBER_MAX_MESSAGE_BYTES",
                defaults.subscriber.max_message_bytes,
            ),
        };

        let staleness = env
            .get("CACHE_STALENESS_POLICY")
            .map_or(defaults.staleness, |s| {
                StalenessPolicy::from_str_case_insensitive(&s)
            });

        let persistence_dir = env
            .get("PERSISTENCE_DIR")
            .map_or_else(|| PathBuf::from("./data"), PathBuf::from);
        let persistence = match env.get("PERSISTENCE_BACKEND") {
            Some(name) => PersistenceBackend::parse(&name, persistence_dir)?,
            None => defaults.persistence,
        };

        let server = ServerSettings {
            http_port: env.parse("HUB_HTTP_PORT", defaults.server.http_port),
            health_port: env.parse("HUB_HEALTH_PORT", defaults.server.health_port),
        };

        // zero or unset disables polling
        let ticker_refresh = Some(env.secs("TICKER_REFRESH_SECS", Duration::ZERO))
            .filter(|interval| !interval.is_zero());

        Ok(Self {
            symbols,
            upstream,
            rest_base_url: env
                .get("UPSTREAM_REST_URL")
                .unwrap_or(defaults.rest_base_url),
            ticker_refresh,
            event_capacity: env.parse("UPSTREAM_EVENT_CAPACITY", defaults.event_capacity),
            broadcast,
            subscriber,
            flush_interval: env.secs("FLUSH_INTERVAL_SECS", defaults.flush_interval),
            staleness,
            persistence,
            server,
            autostart: env.parse("HUB_AUTOSTART", defaults.autostart),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A symbol list was given but contained no symbols.
    #[error("environment variable {0} lists no symbols")]
    NoSymbols(String),
    /// Environment variable has a value that is not allowed.
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_symbols(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Err(ConfigError::NoSymbols("MARKET_SYMBOLS".to_string()));
    }
    Ok(symbols)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        HubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]).unwrap();
        assert_eq!(config.symbols, DEFAULT_SYMBOLS);
        assert_eq!(config.upstream.base_url, "wss://stream.binance.com:9443");
        assert_eq!(config.upstream.heartbeat.ping_interval, Duration::from_secs(20));
        assert!(!config.upstream.reconnect.enabled);
        assert_eq!(config.broadcast.subscriber_capacity, 256);
        assert_eq!(config.subscriber.ping_interval, Duration::from_secs(54));
        assert_eq!(config.subscriber.max_message_bytes, 512);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.staleness, StalenessPolicy::RejectOlder);
        assert_eq!(config.persistence, PersistenceBackend::Memory);
        assert_eq!(config.server, ServerSettings::default());
        assert!(config.autostart);
        assert_eq!(config.rest_base_url, "https://api.binance.com");
        assert_eq!(config.ticker_refresh, None);
    }

    #[test_case("30", Some(Duration::from_secs(30)) ; "enabled")]
    #[test_case("0", None ; "zero disables")]
    #[test_case("soon", None ; "unparseable disables")]
    fn ticker_refresh_is_opt_in(raw: &str, expected: Option<Duration>) {
        let config = config(&[
            ("TICKER_REFRESH_SECS", raw),
            ("UPSTREAM_REST_URL", "http://127.0.0.1:8000"),
        ])
        .unwrap();
        assert_eq!(config.ticker_refresh, expected);
        assert_eq!(config.rest_base_url, "http://127.0.0.1:8000");
    }

    #[test]
    fn symbols_are_normalised_and_deduplicated() {
        let config = config(&[("MARKET_SYMBOLS", " btcusdt, ETHUSDT,,BTCUSDT ")]).unwrap();
        assert_eq!(config.symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test_case(",,," ; "only separators")]
    #[test_case(" , " ; "blank entries")]
    fn empty_symbol_list_is_rejected(raw: &str) {
        assert!(matches!(
            config(&[("MARKET_SYMBOLS", raw)]),
            Err(ConfigError::NoSymbols(_))
        ));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("UPSTREAM_AUTO_RECONNECT", "true"),
            ("UPSTREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("HUB_SUBSCRIBER_QUEUE_CAPACITY", "8"),
            ("SUBSCRIBER_WRITE_TIMEOUT_SECS", "3"),
            ("FLUSH_INTERVAL_SECS", "1"),
            ("CACHE_STALENESS_POLICY", "last_write_wins"),
            ("HUB_HTTP_PORT", "9000"),
            ("HUB_AUTOSTART", "false"),
            ("UPSTREAM_CANDLE_INTERVAL", "5m"),
        ])
        .unwrap();

        assert!(config.upstream.reconnect.enabled);
        assert_eq!(config.upstream.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.broadcast.subscriber_capacity, 8);
        assert_eq!(config.subscriber.write_timeout, Duration::from_secs(3));
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.staleness, StalenessPolicy::LastWriteWins);
        assert_eq!(config.server.http_port, 9000);
        assert!(!config.autostart);
        assert_eq!(config.upstream.candle_interval, "5m");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config(&[
            ("HUB_HTTP_PORT", "not-a-port"),
            ("FLUSH_INTERVAL_SECS", "-1"),
            ("UPSTREAM_DEPTH_LEVELS", "lots"),
        ])
        .unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.upstream.depth_levels, 20);
    }

    #[test_case("memory", "memory" ; "memory")]
    #[test_case("JSONL", "jsonl" ; "jsonl upper case")]
    fn persistence_backend_parsing(name: &str, expected: &str) {
        let config = config(&[("PERSISTENCE_BACKEND", name), ("PERSISTENCE_DIR", "/tmp/hub")])
            .unwrap();
        assert_eq!(config.persistence.as_str(), expected);
    }

    #[test]
    fn jsonl_backend_uses_directory() {
        let config = config(&[("PERSISTENCE_BACKEND", "jsonl"), ("PERSISTENCE_DIR", "/tmp/hub")])
            .unwrap();
        assert_eq!(
            config.persistence,
            PersistenceBackend::Jsonl {
                dir: PathBuf::from("/tmp/hub")
            }
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(matches!(
            config(&[("PERSISTENCE_BACKEND", "postgres")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
