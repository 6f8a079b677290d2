//! Persistence Flusher
//!
//! Periodically copies the state cache and writes every snapshot through
//! the `SnapshotStore` port. A failed write for one symbol is logged and
//! the remaining symbols are still written.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::ports::SnapshotStore;
use crate::domain::cache::StateCache;
use crate::infrastructure::metrics;

/// Default interval between flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Snapshots written successfully.
    pub stored: usize,
    /// Snapshots whose write failed.
    pub failed: usize,
}

/// Periodic snapshot writer.
pub struct PersistenceFlusher {
    cache: Arc<StateCache>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
}

impl PersistenceFlusher {
    /// Create a new flusher.
    #[must_use]
    pub fn new(cache: Arc<StateCache>, store: Arc<dyn SnapshotStore>, interval: Duration) -> Self {
        Self {
            cache,
            store,
            interval,
        }
    }

    /// Write every cached snapshot once.
    pub async fn flush_once(&self) -> FlushReport {
        let mut snapshots: Vec<_> = self.cache.list_all().into_values().collect();
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut report = FlushReport::default();
        for snapshot in &snapshots {
            match self.store.store_snapshot(snapshot).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::record_persistence_failure("snapshot");
                    tracing::warn!(symbol = %snapshot.symbol, error = %e, "Failed to store snapshot");
                }
            }
        }

        metrics::record_snapshots_flushed(report.stored);
        tracing::debug!(
            stored = report.stored,
            failed = report.failed,
            "Flushed cached snapshots"
        );
        report
    }

    /// Flush on every interval tick until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Persistence flusher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.flush_once().await;
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
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockSnapshotStore, PersistenceError};
    use crate::domain::streaming::MarketSnapshot;

    fn snapshot(symbol: &str, price: i64) -> MarketSnapshot {
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
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    fn cache_with(symbols: &[&str]) -> Arc<StateCache> {
        let cache = Arc::new(StateCache::new());
        for (i, symbol) in symbols.iter().enumerate() {
            cache.update(snapshot(symbol, i64::try_from(i).unwrap() + 1));
        }
        cache
    }

    #[tokio::test]
    async fn flush_stores_every_snapshot() {
        let mut store = MockSnapshotStore::new();
        store.expect_store_snapshot().times(3).returning(|_| Ok(()));

        let flusher = PersistenceFlusher::new(
            cache_with(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]),
            Arc::new(store),
            DEFAULT_FLUSH_INTERVAL,
        );

        let report = flusher.flush_once().await;
        assert_eq!(report, FlushReport { stored: 3, failed: 0 });
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_pass() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_store_snapshot()
            .times(3)
            .returning(|s| {
                if s.symbol == "ETHUSDT" {
                    Err(PersistenceError::Rejected("constraint".to_string()))
                } else {
                    Ok(())
                }
            });

        let flusher = PersistenceFlusher::new(
            cache_with(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]),
            Arc::new(store),
            DEFAULT_FLUSH_INTERVAL,
        );

        let report = flusher.flush_once().await;
        assert_eq!(report, FlushReport { stored: 2, failed: 1 });
    }

    #[tokio::test]
    async fn unchanged_cache_is_written_identically_twice() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&written);

        let mut store = MockSnapshotStore::new();
        store.expect_store_snapshot().times(2).returning(move |s| {
            sink.lock().push(s.clone());
            Ok(())
        });

        let flusher = PersistenceFlusher::new(
            cache_with(&["BTCUSDT"]),
            Arc::new(store),
            DEFAULT_FLUSH_INTERVAL,
        );

        flusher.flush_once().await;
        flusher.flush_once().await;

        let written = written.lock();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
    }

    #[tokio::test]
    async fn empty_cache_writes_nothing() {
        let flusher = PersistenceFlusher::new(
            Arc::new(StateCache::new()),
            Arc::new(MockSnapshotStore::new()),
            DEFAULT_FLUSH_INTERVAL,
        );
        assert_eq!(flusher.flush_once().await, FlushReport::default());
    }

    #[tokio::test]
    async fn run_flushes_on_interval_and_stops_on_cancel() {
        let mut store = MockSnapshotStore::new();
        store.expect_store_snapshot().returning(|_| Ok(()));

        let flusher = PersistenceFlusher::new(
            cache_with(&["BTCUSDT"]),
            Arc::new(store),
            Duration::from_millis(20),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(flusher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "flusher should stop on cancellation");
    }
}
