//! In-Memory Snapshot Store
//!
//! Process-local `SnapshotStore`. Keeps the latest snapshot and order book
//! per symbol, a bounded trade history, and candles keyed by
//! `(symbol, interval, open_time)` so a re-sent candle replaces the old
//! row instead of duplicating it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::application::ports::{PersistenceError, SnapshotStore};
use crate::domain::streaming::{CandleUpdate, DepthSnapshot, MarketSnapshot, TradeTick};

/// Trades retained when no capacity is given.
pub const DEFAULT_TRADE_HISTORY: usize = 10_000;

type CandleKey = (String, String, DateTime<Utc>);

/// `SnapshotStore` backed by process memory.
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
    trades: Mutex<VecDeque<TradeTick>>,
    trade_capacity: usize,
    candles: RwLock<BTreeMap<CandleKey, CandleUpdate>>,
    order_books: RwLock<HashMap<String, DepthSnapshot>>,
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySnapshotStore {
    /// Create a store with the default trade history size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_trade_capacity(DEFAULT_TRADE_HISTORY)
    }

    /// Create a store retaining at most `capacity` trades.
    #[must_use]
    pub fn with_trade_capacity(capacity: usize) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            trades: Mutex::new(VecDeque::new()),
            trade_capacity: capacity.max(1),
            candles: RwLock::new(BTreeMap::new()),
            order_books: RwLock::new(HashMap::new()),
        }
    }

    /// Latest stored snapshot for a symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Number of symbols with a stored snapshot.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Retained trades, oldest first.
    #[must_use]
    pub fn trades(&self) -> Vec<TradeTick> {
        self.trades.lock().iter().cloned().collect()
    }

    /// Stored candles for a symbol, ordered by interval then open time.
    #[must_use]
    pub fn candles(&self, symbol: &str) -> Vec<CandleUpdate> {
        self.candles
            .read()
            .values()
            .filter(|c| c.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Latest stored order book for a symbol.
    #[must_use]
    pub fn order_book(&self, symbol: &str) -> Option<DepthSnapshot> {
        self.order_books.read().get(symbol).cloned()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn store_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), PersistenceError> {
        self.snapshots
            .write()
            .insert(snapshot.symbol.clone(), snapshot.clone());
        Ok(())
    }

    async fn store_trade(&self, trade: &TradeTick) -> Result<(), PersistenceError> {
        let mut trades = self.trades.lock();
        while trades.len() >= self.trade_capacity {
            trades.pop_front();
        }
        trades.push_back(trade.clone());
        Ok(())
    }

    async fn store_candle(&self, candle: &CandleUpdate) -> Result<(), PersistenceError> {
        let key = (
            candle.symbol.clone(),
            candle.interval.clone(),
            candle.open_time,
        );
        self.candles.write().insert(key, candle.clone());
        Ok(())
    }

    async fn store_order_book(&self, depth: &DepthSnapshot) -> Result<(), PersistenceError> {
        self.order_books
            .write()
            .insert(depth.symbol.clone(), depth.clone());
        Ok(())
    }
}
