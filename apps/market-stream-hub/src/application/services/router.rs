//! Market Event Router
//!
//! Type-specific handling for decoded upstream events:
//!
//! | Event  | Cache         | Persistence               | Broadcast |
//! |--------|---------------|---------------------------|-----------|
//! | Ticker | update        | via flusher               | `ticker` (unless stale) |
//! | Trade  | -             | `store_trade`             | `trade`   |
//! | Depth  | -             | `store_order_book`        | `depth`   |
//! | Candle | -             | `store_candle` if closed  | `kline`   |
//!
//! Persistence and broadcast are independent: a failed write is logged
//! and the envelope is still published.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EnvelopePublisher, PublishError, SnapshotStore};
use crate::domain::cache::StateCache;
use crate::domain::streaming::{BroadcastEnvelope, MarketEvent};
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::UpstreamEvent;

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The event was published to subscribers.
    Published,
    /// A ticker older than the cached snapshot was discarded.
    Stale,
    /// The envelope could not be built.
    EncodeFailed,
}

/// Routes decoded market events to the cache, the store and the hub.
pub struct MarketEventRouter {
    cache: Arc<StateCache>,
    store: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EnvelopePublisher>,
}

impl MarketEventRouter {
    /// Create a new router.
    #[must_use]
    pub fn new(
        cache: Arc<StateCache>,
        store: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn EnvelopePublisher>,
    ) -> Self {
        Self {
            cache,
            store,
            publisher,
        }
    }

    /// Handle one market event.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::HubClosed` if the broadcast hub has stopped.
    pub async fn route(&self, event: MarketEvent) -> Result<RouteOutcome, PublishError> {
        match &event {
            MarketEvent::Ticker(snapshot) => {
                let outcome = self.cache.update(snapshot.clone());
                if !outcome.is_applied() {
                    tracing::debug!(
                        symbol = %snapshot.symbol,
                        timestamp = %snapshot.timestamp,
                        "Discarding stale ticker"
                    );
                    metrics::record_stale_ticker();
                    return Ok(RouteOutcome::Stale);
                }
                metrics::set_cached_symbols(self.cache.len());
            }
            MarketEvent::Trade(trade) => {
                if let Err(e) = self.store.store_trade(trade).await {
                    tracing::warn!(symbol = %trade.symbol, error = %e, "Failed to store trade");
                    metrics::record_persistence_failure("trade");
                }
            }
            MarketEvent::Depth(depth) => {
                if let Err(e) = self.store.store_order_book(depth).await {
                    tracing::warn!(symbol = %depth.symbol, error = %e, "Failed to store order book");
                    metrics::record_persistence_failure("depth");
                }
            }
            MarketEvent::Candle(candle) => {
                if candle.closed {
                    if let Err(e) = self.store.store_candle(candle).await {
                        tracing::warn!(
                            symbol = %candle.symbol,
                            interval = %candle.interval,
                            error = %e,
                            "Failed to store candle"
                        );
                        metrics::record_persistence_failure("candle");
                    }
                }
            }
        }

        let envelope = match BroadcastEnvelope::from_event(&event) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(symbol = %event.symbol(), error = %e, "Failed to encode envelope");
                return Ok(RouteOutcome::EncodeFailed);
            }
        };

        self.publisher.publish(Arc::new(envelope)).await?;
        Ok(RouteOutcome::Published)
    }

    /// Consume upstream events until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<UpstreamEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Event router cancelled");
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(UpstreamEvent::Market(event)) => {
                    let kind = event.kind().as_str();
                    let started = Instant::now();
                    if let Err(e) = self.route(event).await {
                        tracing::warn!(error = %e, "Stopping event router");
                        break;
                    }
                    metrics::record_routing_duration(kind, started.elapsed());
                }
                Some(UpstreamEvent::Connected) => {
                    tracing::info!("Upstream feed connected");
                }
                Some(UpstreamEvent::Disconnected) => {
                    tracing::warn!("Upstream feed disconnected");
                }
                None => {
                    tracing::debug!("Upstream event channel closed");
                    break;
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
    use mockall::predicate::always;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockEnvelopePublisher, MockSnapshotStore, PersistenceError};
    use crate::domain::streaming::{
        CandleUpdate, EnvelopeKind, MarketSnapshot, PriceLevel, TradeTick,
    };

    fn ticker(price: i64, millis: i64) -> MarketEvent {
        let price = Decimal::from(price);
        MarketEvent::Ticker(MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
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
        })
    }

    fn candle(closed: bool) -> MarketEvent {
        MarketEvent::Candle(CandleUpdate {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            open: Decimal::from(100),
            high: Decimal::from(110),
            low: Decimal::from(95),
            close: Decimal::from(105),
            volume: Decimal::from(3),
            quote_volume: Decimal::from(315),
            trade_count: 12,
            open_time: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            close_time: Utc.timestamp_millis_opt(1_700_000_059_999).unwrap(),
            closed,
        })
    }

    fn publisher_expecting(times: usize) -> MockEnvelopePublisher {
        let mut publisher = MockEnvelopePublisher::new();
        publisher
            .expect_publish()
            .with(always())
            .times(times)
            .returning(|_| Ok(()));
        publisher
    }

    #[tokio::test]
    async fn ticker_updates_cache_and_publishes() {
        let cache = Arc::new(StateCache::new());
        let mut publisher = MockEnvelopePublisher::new();
        publisher
            .expect_publish()
            .withf(|e| e.kind == EnvelopeKind::Ticker && e.symbol.as_deref() == Some("BTCUSDT"))
            .times(1)
            .returning(|_| Ok(()));

        let router = MarketEventRouter::new(
            Arc::clone(&cache),
            Arc::new(MockSnapshotStore::new()),
            Arc::new(publisher),
        );

        let outcome = router.route(ticker(65_000, 1_000)).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Published);
        assert_eq!(cache.get("BTCUSDT").unwrap().price, Decimal::from(65_000));
    }

    #[tokio::test]
    async fn stale_ticker_is_not_published() {
        let cache = Arc::new(StateCache::new());
        let router = MarketEventRouter::new(
            Arc::clone(&cache),
            Arc::new(MockSnapshotStore::new()),
            Arc::new(publisher_expecting(1)),
        );

        router.route(ticker(2, 2_000)).await.unwrap();
        let outcome = router.route(ticker(1, 1_000)).await.unwrap();

        assert_eq!(outcome, RouteOutcome::Stale);
        assert_eq!(cache.get("BTCUSDT").unwrap().price, Decimal::from(2));
    }

    #[tokio::test]
    async fn only_closed_candles_are_persisted() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_store_candle()
            .withf(|c| c.closed)
            .times(1)
            .returning(|_| Ok(()));

        let router = MarketEventRouter::new(
            Arc::new(StateCache::new()),
            Arc::new(store),
            Arc::new(publisher_expecting(2)),
        );

        router.route(candle(false)).await.unwrap();
        router.route(candle(true)).await.unwrap();
    }

    #[tokio::test]
    async fn persistence_failure_still_publishes() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_store_trade()
            .times(1)
            .returning(|_| Err(PersistenceError::Rejected("down".to_string())));

        let router = MarketEventRouter::new(
            Arc::new(StateCache::new()),
            Arc::new(store),
            Arc::new(publisher_expecting(1)),
        );

        let trade = MarketEvent::Trade(TradeTick {
            symbol: "ETHUSDT".to_string(),
            trade_id: 1,
            price: Decimal::from(3_000),
            quantity: Decimal::ONE,
            trade_time: Utc::now(),
            is_buyer_maker: false,
        });

        assert_eq!(router.route(trade).await.unwrap(), RouteOutcome::Published);
    }

    #[tokio::test]
    async fn depth_is_stored_and_published() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_store_order_book()
            .withf(|d| d.bids.len() == 1 && d.asks.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let router = MarketEventRouter::new(
            Arc::new(StateCache::new()),
            Arc::new(store),
            Arc::new(publisher_expecting(1)),
        );

        let depth = MarketEvent::Depth(crate::domain::streaming::DepthSnapshot {
            symbol: "BNBUSDT".to_string(),
            bids: vec![PriceLevel {
                price: Decimal::from(600),
                quantity: Decimal::ONE,
            }],
            asks: vec![],
            last_update_id: 10,
            timestamp: Utc::now(),
        });

        router.route(depth).await.unwrap();
    }

    #[tokio::test]
    async fn closed_hub_is_reported() {
        let mut publisher = MockEnvelopePublisher::new();
        publisher
            .expect_publish()
            .returning(|_| Err(PublishError::HubClosed));

        let router = MarketEventRouter::new(
            Arc::new(StateCache::new()),
            Arc::new(MockSnapshotStore::new()),
            Arc::new(publisher),
        );

        assert_eq!(
            router.route(ticker(1, 1)).await,
            Err(PublishError::HubClosed)
        );
    }

    #[tokio::test]
    async fn run_stops_when_channel_closes() {
        let router = MarketEventRouter::new(
            Arc::new(StateCache::new()),
            Arc::new(MockSnapshotStore::new()),
            Arc::new(publisher_expecting(1)),
        );

        let (tx, rx) = mpsc::channel(8);
        tx.send(UpstreamEvent::Connected).await.unwrap();
        tx.send(UpstreamEvent::Market(ticker(1, 1))).await.unwrap();
        tx.send(UpstreamEvent::Disconnected).await.unwrap();
        drop(tx);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            router.run(rx, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
