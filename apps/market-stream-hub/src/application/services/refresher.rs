//! Ticker Refresher
//!
//! Polls a `TickerSource` and writes the tracked symbols' 24h statistics
//! into the state cache. Seeds the cache before the first stream tick and
//! repairs symbols whose stream has gone quiet. The cache's staleness
//! policy still applies, so a polled snapshot never replaces a newer
//! streamed one. Nothing is published to subscribers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{TickerSource, TickerSourceError};
use crate::domain::cache::StateCache;
use crate::infrastructure::metrics;

/// Result of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Snapshots written to the cache.
    pub applied: usize,
    /// Snapshots older than the cached one.
    pub stale: usize,
    /// Entries for symbols that are not tracked.
    pub ignored: usize,
}

/// Periodic poller feeding the state cache.
pub struct TickerRefresher {
    source: Arc<dyn TickerSource>,
    cache: Arc<StateCache>,
    symbols: HashSet<String>,
    interval: Duration,
}

impl TickerRefresher {
    /// Create a refresher for a fixed set of symbols.
    #[must_use]
    pub fn new<I, S>(
        source: Arc<dyn TickerSource>,
        cache: Arc<StateCache>,
        symbols: I,
        interval: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            cache,
            symbols: symbols.into_iter().map(Into::into).collect(),
            interval,
        }
    }

    /// Fetch once and apply tracked symbols to the cache.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the cache is left untouched.
    pub async fn refresh_once(&self) -> Result<RefreshReport, TickerSourceError> {
        let tickers = self.source.fetch_tickers().await?;

        let mut report = RefreshReport::default();
        for snapshot in tickers {
            if !self.symbols.contains(&snapshot.symbol) {
                report.ignored += 1;
                continue;
            }
            if self.cache.update(snapshot).is_applied() {
                report.applied += 1;
            } else {
                report.stale += 1;
            }
        }

        tracing::debug!(
            applied = report.applied,
            stale = report.stale,
            ignored = report.ignored,
            "Refreshed tickers"
        );
        Ok(report)
    }

    /// Refresh immediately, then on every interval tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Ticker refresher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.refresh_once().await {
                        Ok(_) => metrics::record_ticker_refresh("ok"),
                        Err(e) => {
                            metrics::record_ticker_refresh("error");
                            tracing::warn!(error = %e, "Ticker refresh failed");
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::application::ports::MockTickerSource;
    use crate::domain::streaming::MarketSnapshot;

    fn snapshot(symbol: &str, price: i64, millis: i64) -> MarketSnapshot {
        let price = Decimal::from(price);
        MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            price_change: Decimal::ZERO,
            price_change_percent: Decimal::ZERO,
            volume: Decimal::ONE,
            quote_volume: price,
            high: price,
            low: price,
            open_price: price,
            bid_price: price,
            ask_price: price,
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
        }
    }

    fn source_returning(tickers: Vec<MarketSnapshot>) -> Arc<dyn TickerSource> {
        let mut source = MockTickerSource::new();
        source
            .expect_fetch_tickers()
            .returning(move || Ok(tickers.clone()));
        Arc::new(source)
    }

    #[tokio::test]
    async fn only_tracked_symbols_are_cached() {
        let cache = Arc::new(StateCache::new());
        let refresher = TickerRefresher::new(
            source_returning(vec![
                snapshot("BTCUSDT", 65_000, 1_000),
                snapshot("DOGEUSDT", 1, 1_000),
                snapshot("ETHUSDT", 3_000, 1_000),
            ]),
            Arc::clone(&cache),
            ["BTCUSDT", "ETHUSDT"],
            Duration::from_secs(30),
        );

        let report = assert_ok!(refresher.refresh_once().await);

        assert_eq!(
            report,
            RefreshReport {
                applied: 2,
                stale: 0,
                ignored: 1
            }
        );
        assert!(cache.get("DOGEUSDT").is_none());
        assert_eq!(cache.get("ETHUSDT").unwrap().price, Decimal::from(3_000));
    }

    #[tokio::test]
    async fn newer_streamed_snapshot_is_kept() {
        let cache = Arc::new(StateCache::new());
        cache.update(snapshot("BTCUSDT", 66_000, 5_000));

        let refresher = TickerRefresher::new(
            source_returning(vec![snapshot("BTCUSDT", 65_000, 1_000)]),
            Arc::clone(&cache),
            ["BTCUSDT"],
            Duration::from_secs(30),
        );

        let report = assert_ok!(refresher.refresh_once().await);
        assert_eq!(report.stale, 1);
        assert_eq!(cache.get("BTCUSDT").unwrap().price, Decimal::from(66_000));
    }

    #[tokio::test]
    async fn source_error_leaves_cache_untouched() {
        let mut source = MockTickerSource::new();
        source
            .expect_fetch_tickers()
            .returning(|| Err(TickerSourceError::Network("connection refused".to_string())));

        let cache = Arc::new(StateCache::new());
        let refresher = TickerRefresher::new(
            Arc::new(source),
            Arc::clone(&cache),
            ["BTCUSDT"],
            Duration::from_secs(30),
        );

        assert_err!(refresher.refresh_once().await);
        assert!(cache.list_all().is_empty());
    }

    #[tokio::test]
    async fn run_seeds_immediately_and_stops_on_cancel() {
        let cache = Arc::new(StateCache::new());
        let refresher = TickerRefresher::new(
            source_returning(vec![snapshot("SOLUSDT", 150, 1_000)]),
            Arc::clone(&cache),
            ["SOLUSDT"],
            Duration::from_secs(3_600),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresher.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.get("SOLUSDT").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "refresher should stop on cancellation");
    }
}
