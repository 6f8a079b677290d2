//! JSON Lines Store Integration Tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tempfile::TempDir;

use market_stream_hub::{
    DepthSnapshot, JsonlSnapshotStore, MarketSnapshot, PersistenceBackend, PriceLevel,
    SnapshotStore, TradeTick, open_store,
};

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
        timestamp: Utc::now(),
    }
}

fn read_lines(dir: &std::path::Path, file: &str) -> Vec<serde_json::Value> {
    std::fs::read_to_string(dir.join(file))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn snapshots_append_one_line_each() {
    let tmp = TempDir::new().unwrap();
    let store = JsonlSnapshotStore::open(tmp.path()).await.unwrap();

    store.store_snapshot(&snapshot("BTCUSDT", 65_000)).await.unwrap();
    store.store_snapshot(&snapshot("BTCUSDT", 65_100)).await.unwrap();
    store.store_snapshot(&snapshot("ETHUSDT", 3_000)).await.unwrap();

    let lines = read_lines(tmp.path(), "snapshots.jsonl");
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["symbol"], "BTCUSDT");
    assert_eq!(lines[1]["price"].as_f64(), Some(65_100.0));
    assert_eq!(lines[2]["symbol"], "ETHUSDT");
}

#[tokio::test]
async fn record_kinds_go_to_separate_files() {
    let tmp = TempDir::new().unwrap();
    let store = JsonlSnapshotStore::open(tmp.path()).await.unwrap();

    store
        .store_trade(&TradeTick {
            symbol: "ETHUSDT".to_string(),
            trade_id: 9,
            price: Decimal::from(3_000),
            quantity: Decimal::ONE,
            trade_time: Utc::now(),
            is_buyer_maker: true,
        })
        .await
        .unwrap();
    store
        .store_order_book(&DepthSnapshot {
            symbol: "BNBUSDT".to_string(),
            bids: vec![PriceLevel {
                price: Decimal::from(600),
                quantity: Decimal::ONE,
            }],
            asks: vec![],
            last_update_id: 77,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(read_lines(tmp.path(), "trades.jsonl").len(), 1);
    let books = read_lines(tmp.path(), "order_books.jsonl");
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["symbol"], "BNBUSDT");
    assert!(!tmp.path().join("snapshots.jsonl").exists());
}

#[tokio::test]
async fn concurrent_writers_never_interleave_lines() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JsonlSnapshotStore::open(tmp.path()).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .store_snapshot(&snapshot("SOLUSDT", 100 + i))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(read_lines(tmp.path(), "snapshots.jsonl").len(), 20);
}

#[tokio::test]
async fn open_store_creates_nested_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("hub").join("data");
    let backend = PersistenceBackend::Jsonl { dir: dir.clone() };

    let store = open_store(&backend).await.unwrap();
    store.store_snapshot(&snapshot("ADAUSDT", 1)).await.unwrap();

    assert!(dir.join("snapshots.jsonl").exists());
}
