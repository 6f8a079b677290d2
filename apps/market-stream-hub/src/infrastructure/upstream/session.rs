//! Upstream Session
//!
//! Maintains a single combined-stream WebSocket connection to the exchange
//! for every tracked symbol and forwards decoded events to the event
//! router.
//!
//! # Stream URL
//!
//! `{base_url}/stream?streams=btcusdt@ticker/btcusdt@trade/btcusdt@kline_1m/...`
//!
//! # Lifecycle
//!
//! - `start` dials synchronously so connection errors reach the caller,
//!   then spawns the read loop.
//! - `stop` cancels the read loop; the socket is closed with a close frame.
//! - `add_symbol` only changes the subscription set. The URL is built on
//!   `start`, so new symbols are picked up on the next start.
//! - A dropped connection ends the session unless reconnect is enabled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::StreamCodec;
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::streaming::MarketEvent;
use crate::domain::subscription::{
    DEFAULT_CANDLE_INTERVAL, DEFAULT_DEPTH_LEVELS, InstrumentChannel, SubscriptionSet,
};
use crate::infrastructure::metrics;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default exchange endpoint.
pub const DEFAULT_BASE_URL: &str = "wss://stream.binance.com:9443";

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the upstream session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `start` was called while a connection is live.
    #[error("upstream session is already running")]
    AlreadyRunning,

    /// There is nothing to subscribe to.
    #[error("no symbols configured")]
    NoSymbols,

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer was silent for longer than the pong timeout.
    #[error("keepalive timeout after {0:?} of silence")]
    HeartbeatTimeout(Duration),

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nobody is consuming events any more.
    #[error("event channel closed")]
    EventChannelClosed,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the upstream session.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Decoded market event.
    Market(MarketEvent),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base WebSocket URL, without the `/stream` path.
    pub base_url: String,
    /// Candle interval subscribed for every symbol.
    pub candle_interval: String,
    /// Partial depth levels subscribed for every symbol.
    pub depth_levels: u16,
    /// Keepalive configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            candle_interval: DEFAULT_CANDLE_INTERVAL.to_string(),
            depth_levels: DEFAULT_DEPTH_LEVELS,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

struct ActiveRun {
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

/// Upstream combined-stream session.
pub struct UpstreamSession {
    config: SessionConfig,
    codec: StreamCodec,
    subscriptions: RwLock<SubscriptionSet>,
    active: Mutex<Option<ActiveRun>>,
}

impl UpstreamSession {
    /// Create a new session tracking `symbols`. Nothing connects until
    /// `start` is called.
    #[must_use]
    pub fn new<I, S>(config: SessionConfig, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let template =
            SubscriptionSet::template_with(&config.candle_interval, config.depth_levels);
        let mut subscriptions = SubscriptionSet::new(template);
        subscriptions.extend(symbols);

        Self {
            config,
            codec: StreamCodec::new(),
            subscriptions: RwLock::new(subscriptions),
            active: Mutex::new(None),
        }
    }

    /// Connect and spawn the read loop.
    ///
    /// Events are sent to `events` until the session stops. The read loop
    /// is cancelled together with `parent`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyRunning` if a connection is live,
    /// `SessionError::NoSymbols` if nothing is tracked, or
    /// `SessionError::WebSocket` if the dial fails.
    pub async fn start(
        &self,
        parent: &CancellationToken,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }

        let url = self.stream_url().ok_or(SessionError::NoSymbols)?;

        tracing::info!(url = %url, "Connecting to upstream stream");
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|run| run.running.load(Ordering::SeqCst)) {
            return Err(SessionError::AlreadyRunning);
        }

        let cancel = parent.child_token();
        let running = Arc::new(AtomicBool::new(true));

        let connection = Connection {
            url,
            codec: self.codec.clone(),
            heartbeat: self.config.heartbeat,
            reconnect: self.config.reconnect,
            events,
            cancel: cancel.clone(),
        };
        let flag = Arc::clone(&running);
        tokio::spawn(async move {
            connection.run(socket).await;
            flag.store(false, Ordering::SeqCst);
        });

        *active = Some(ActiveRun { cancel, running });
        drop(active);

        tracing::info!(symbols = self.subscriptions.read().len(), "Upstream session started");
        Ok(())
    }

    /// Stop the read loop. A no-op if not running.
    pub fn stop(&self) {
        if let Some(run) = self.active.lock().take() {
            run.running.store(false, Ordering::SeqCst);
            run.cancel.cancel();
            tracing::info!("Upstream session stopped");
        }
    }

    /// Whether a connection is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::SeqCst))
    }

    /// Track a new symbol. Takes effect on the next `start`.
    ///
    /// Returns `false` if the symbol was blank or already tracked.
    pub fn add_symbol(&self, symbol: &str) -> bool {
        self.subscriptions.write().add_symbol(symbol)
    }

    /// Tracked symbols in insertion order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.subscriptions.read().symbols().to_vec()
    }

    /// Every instrument channel the next `start` will subscribe to.
    #[must_use]
    pub fn channels(&self) -> Vec<InstrumentChannel> {
        self.subscriptions.read().channels()
    }

    /// Combined-stream URL for the current subscription set, or `None`
    /// if no symbols are tracked.
    #[must_use]
    pub fn stream_url(&self) -> Option<String> {
        let subscriptions = self.subscriptions.read();
        if subscriptions.is_empty() {
            return None;
        }
        Some(format!(
            "{}/stream?streams={}",
            self.config.base_url.trim_end_matches('/'),
            subscriptions.stream_path()
        ))
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct Connection {
    url: String,
    codec: StreamCodec,
    heartbeat: HeartbeatConfig,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run(self, socket: UpstreamSocket) {
        let mut policy = ReconnectPolicy::new(self.reconnect);
        let mut socket = Some(socket);

        loop {
            let Some(current) = socket.take() else {
                break;
            };

            metrics::set_upstream_connected(true);
            let _ = self.events.send(UpstreamEvent::Connected).await;

            let result = self.pump(current).await;

            metrics::set_upstream_connected(false);
            let _ = self.events.send(UpstreamEvent::Disconnected).await;

            match result {
                Ok(()) => {
                    tracing::info!("Upstream connection closed on request");
                    break;
                }
                Err(SessionError::EventChannelClosed) => {
                    tracing::info!("Event consumer gone; closing upstream connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection lost");
                }
            }

            socket = self.redial(&mut policy).await;
        }
    }

    /// Re-establish the connection according to `policy`.
    ///
    /// Returns `None` when reconnect is disabled, attempts are exhausted
    /// or the session was cancelled.
    async fn redial(&self, policy: &mut ReconnectPolicy) -> Option<UpstreamSocket> {
        while let Some(delay) = policy.next_delay() {
            tracing::info!(
                attempt = policy.attempts(),
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream stream"
            );
            metrics::record_upstream_reconnect();

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    policy.reset();
                    return Some(socket);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream reconnect failed");
                }
            }
        }
        None
    }

    /// Read frames until cancelled or the connection fails.
    async fn pump(&self, socket: UpstreamSocket) -> Result<(), SessionError> {
        let (mut write, mut read) = socket.split();
        let mut heartbeat = HeartbeatState::new(self.heartbeat);

        let period = heartbeat.ping_interval();
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(vec![].into())).await?;
                        }
                        HeartbeatAction::Expired { silent_for } => {
                            tracing::warn!(
                                silent_secs = silent_for.as_secs(),
                                "Upstream keepalive timeout"
                            );
                            return Err(SessionError::HeartbeatTimeout(silent_for));
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_) | Message::Binary(_))) => {
                            heartbeat.record_activity();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Upstream sent close frame");
                            return Err(SessionError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(SessionError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Decode one text frame and forward it. Bad frames are logged and
    /// skipped.
    async fn handle_text(&self, text: &str) -> Result<(), SessionError> {
        match self.codec.decode(text) {
            Ok(event) => {
                metrics::record_upstream_frame(event.kind().as_str());
                self.events
                    .send(UpstreamEvent::Market(event))
                    .await
                    .map_err(|_| SessionError::EventChannelClosed)
            }
            Err(e) if e.is_unknown_channel() => {
                tracing::debug!(error = %e, "Dropping frame for unknown channel");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed upstream frame");
                metrics::record_decode_error();
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
