//! Upstream Session Integration Tests
//!
//! Runs the session against a local WebSocket server that plays back
//! combined-stream frames.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_stream_hub::{MarketEvent, SessionConfig, SessionError, UpstreamEvent, UpstreamSession};

const TICKER: &str = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"10","P":"0.5","c":"65000","b":"64999","a":"65001","o":"64990","h":"65100","l":"64000","v":"12","q":"780000"}}"#;
const TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":42,"p":"65000.5","q":"0.01","T":1700000000001,"m":true}}"#;
const UNKNOWN: &str = r#"{"stream":"btcusdt@aggTrade","data":{}}"#;
const MALFORMED: &str = "{\"stream\":\"btcusdt@ticker\",\"data\":";

/// Accept one client, send `frames`, then close.
async fn spawn_feed(frames: Vec<&'static str>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        ws.close(None).await.ok();
        while let Some(Ok(_)) = ws.next().await {}
    });

    (format!("ws://{addr}"), handle)
}

fn session(base_url: String, symbols: &[&str]) -> UpstreamSession {
    let config = SessionConfig {
        base_url,
        ..SessionConfig::default()
    };
    UpstreamSession::new(config, symbols.iter().copied())
}

async fn next_event(rx: &mut mpsc::Receiver<UpstreamEvent>) -> UpstreamEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for upstream event")
        .expect("event channel closed")
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let (url, server) = spawn_feed(vec![MALFORMED, TICKER, UNKNOWN, TRADE]).await;
    let session = session(url, &["BTCUSDT"]);
    let (tx, mut rx) = mpsc::channel(16);

    session.start(&CancellationToken::new(), tx).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, UpstreamEvent::Connected));

    let UpstreamEvent::Market(MarketEvent::Ticker(snapshot)) = next_event(&mut rx).await else {
        panic!("expected ticker after malformed frame");
    };
    assert_eq!(snapshot.symbol, "BTCUSDT");
    assert_eq!(snapshot.price.to_string(), "65000");

    let UpstreamEvent::Market(MarketEvent::Trade(trade)) = next_event(&mut rx).await else {
        panic!("expected trade after unknown channel");
    };
    assert_eq!(trade.trade_id, 42);
    assert!(trade.is_buyer_maker);

    assert!(matches!(next_event(&mut rx).await, UpstreamEvent::Disconnected));
    server.await.unwrap();
}

#[tokio::test]
async fn closed_upstream_ends_session_without_reconnect() {
    let (url, server) = spawn_feed(vec![TICKER]).await;
    let session = session(url, &["BTCUSDT"]);
    let (tx, mut rx) = mpsc::channel(16);

    session.start(&CancellationToken::new(), tx).await.unwrap();
    assert!(session.is_running());

    loop {
        if matches!(next_event(&mut rx).await, UpstreamEvent::Disconnected) {
            break;
        }
    }
    server.await.unwrap();

    timeout(Duration::from_secs(5), async {
        while session.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session should stop after upstream close");
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let session = session(format!("ws://{addr}"), &["ETHUSDT"]);
    let (tx, _rx) = mpsc::channel(16);
    session.start(&CancellationToken::new(), tx.clone()).await.unwrap();

    let err = session
        .start(&CancellationToken::new(), tx)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyRunning));

    session.stop();
    assert!(!session.is_running());
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn added_symbol_waits_for_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let session = session(format!("ws://{addr}"), &["BTCUSDT"]);
    let (tx, mut rx) = mpsc::channel(16);
    session.start(&CancellationToken::new(), tx).await.unwrap();
    assert!(matches!(next_event(&mut rx).await, UpstreamEvent::Connected));

    assert!(session.add_symbol("solusdt"));
    assert!(session.is_running());
    assert_eq!(session.symbols(), vec!["BTCUSDT", "SOLUSDT"]);
    assert!(session.stream_url().unwrap().contains("solusdt@ticker"));

    session.stop();
    assert!(matches!(next_event(&mut rx).await, UpstreamEvent::Disconnected));
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}
