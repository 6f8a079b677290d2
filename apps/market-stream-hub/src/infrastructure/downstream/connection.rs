//! Subscriber Connection
//!
//! Drives one downstream WebSocket after the upgrade. The socket is split
//! into a write half and a read half, each served by its own task:
//!
//! - **write**: drains the subscriber queue into JSON text frames and pings
//!   when nothing has been written for `ping_interval`
//! - **read**: discards client payloads and watches for close; any frame
//!   (including pongs) resets the `pong_wait` deadline
//!
//! Both tasks share a per-connection token. Whichever finishes first
//! cancels it. The read task unregisters from the hub as soon as it stops,
//! and a cancelled write task sends a close frame before dropping its half
//! so subscribers always see a clean disconnect.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;

use super::DownstreamError;
use crate::domain::streaming::SharedEnvelope;
use crate::infrastructure::broadcast::{SharedBroadcastHub, SubscriberId};

/// Close reason sent when the server is going away.
const SHUTDOWN_REASON: &str = "shutting down";

// =============================================================================
// Configuration
// =============================================================================

/// Timing and size limits for subscriber connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Idle time after which the write task sends a ping.
    pub ping_interval: Duration,
    /// Longest the read task waits for any inbound frame.
    pub pong_wait: Duration,
    /// Upper bound on a single frame write.
    pub write_timeout: Duration,
    /// Largest inbound message accepted from a subscriber.
    pub max_message_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 512,
        }
    }
}

// =============================================================================
// Subscriber Lifecycle
// =============================================================================

/// Lifecycle of a downstream subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Upgraded, not yet known to the hub.
    Connecting,
    /// Receiving envelopes.
    Registered,
    /// Read side stopped, removal from the hub in progress.
    Unregistering,
    /// Removed from the hub.
    Closed,
}

impl SubscriberState {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Unregistering => "unregistering",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the read task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadExit {
    ClientClosed,
    Deadline,
    Error,
    Cancelled,
}

/// Why the write task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteExit {
    QueueClosed,
    WriteFailed,
    Cancelled,
}

// =============================================================================
// Connection
// =============================================================================

/// Serve an upgraded socket until either side closes or `shutdown` fires.
///
/// Registers with the hub and runs the write and read tasks until both have
/// stopped. If the hub is already closed the socket is sent a close frame
/// and dropped.
pub async fn serve_subscriber(
    mut socket: WebSocket,
    hub: SharedBroadcastHub,
    config: ConnectionConfig,
    shutdown: CancellationToken,
) {
    let mut state = SubscriberState::Connecting;

    let subscription = match hub.register().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, state = %state, "Rejecting subscriber");
            let _ = socket.send(close_message(close_code::AWAY, SHUTDOWN_REASON)).await;
            return;
        }
    };
    let id = subscription.id;
    state = SubscriberState::Registered;
    tracing::info!(subscriber_id = id, state = %state, "Subscriber connected");

    let token = shutdown.child_token();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        id,
        sink,
        subscription.receiver,
        config,
        token.clone(),
    ));
    let reader = tokio::spawn(read_loop(id, stream, hub, config, token.clone()));

    let (write_exit, read_exit) = tokio::join!(writer, reader);
    tracing::debug!(
        subscriber_id = id,
        write_exit = ?write_exit.ok(),
        read_exit = ?read_exit.ok(),
        "Subscriber tasks finished"
    );

    state = SubscriberState::Closed;
    tracing::info!(subscriber_id = id, state = %state, "Subscriber disconnected");
}

async fn write_loop(
    id: SubscriberId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<SharedEnvelope>,
    config: ConnectionConfig,
    token: CancellationToken,
) -> WriteExit {
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;

            () = token.cancelled() => {
                let close = close_message(close_code::AWAY, SHUTDOWN_REASON);
                if let Err(e) = send_frame(&mut sink, close, config.write_timeout).await {
                    tracing::debug!(subscriber_id = id, error = %e, "Close frame not sent");
                }
                break WriteExit::Cancelled;
            }

            next = queue.recv() => {
                let Some(envelope) = next else {
                    // Evicted by the hub or the hub shut down.
                    let close = close_message(close_code::AGAIN, "subscriber queue closed");
                    if let Err(e) = send_frame(&mut sink, close, config.write_timeout).await {
                        tracing::debug!(subscriber_id = id, error = %e, "Close frame not sent");
                    }
                    break WriteExit::QueueClosed;
                };

                let text = match envelope.encoded() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            subscriber_id = id,
                            error = %e,
                            "Skipping unencodable envelope"
                        );
                        continue;
                    }
                };

                let frame = Message::Text((&*text).into());
                if let Err(e) = send_frame(&mut sink, frame, config.write_timeout).await {
                    tracing::debug!(subscriber_id = id, error = %e, "Write failed");
                    break WriteExit::WriteFailed;
                }
                ping.reset();
            }

            _ = ping.tick() => {
                let frame = Message::Ping(vec![].into());
                if let Err(e) = send_frame(&mut sink, frame, config.write_timeout).await {
                    tracing::debug!(subscriber_id = id, error = %e, "Ping failed");
                    break WriteExit::WriteFailed;
                }
            }
        }
    };

    token.cancel();
    exit
}

async fn read_loop(
    id: SubscriberId,
    mut stream: SplitStream<WebSocket>,
    hub: SharedBroadcastHub,
    config: ConnectionConfig,
    token: CancellationToken,
) -> ReadExit {
    let exit = loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break ReadExit::Cancelled,
            next = timeout(config.pong_wait, stream.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::debug!(
                    subscriber_id = id,
                    pong_wait_secs = config.pong_wait.as_secs(),
                    "Read deadline elapsed"
                );
                break ReadExit::Deadline;
            }
            Ok(None | Some(Ok(Message::Close(_)))) => break ReadExit::ClientClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(subscriber_id = id, error = %e, "Read failed");
                break ReadExit::Error;
            }
            Ok(Some(Ok(Message::Text(_) | Message::Binary(_)))) => {
                tracing::trace!(subscriber_id = id, "Ignoring subscriber payload");
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        }
    };

    token.cancel();

    // Stop queueing to this subscriber before the write side drains.
    let state = SubscriberState::Unregistering;
    tracing::debug!(subscriber_id = id, state = %state, exit = ?exit, "Read side stopped");
    if let Err(e) = hub.unregister(id).await {
        tracing::debug!(subscriber_id = id, error = %e, "Unregister after hub shutdown");
    }

    exit
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    limit: Duration,
) -> Result<(), DownstreamError> {
    match timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DownstreamError::Write(e.to_string())),
        Err(_) => Err(DownstreamError::WriteTimeout(limit)),
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let config = ConnectionConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(54));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_bytes, 512);
        assert!(config.ping_interval < config.pong_wait);
    }

    #[test]
    fn state_names() {
        assert_eq!(SubscriberState::Connecting.to_string(), "connecting");
        assert_eq!(SubscriberState::Registered.as_str(), "registered");
        assert_eq!(SubscriberState::Unregistering.as_str(), "unregistering");
        assert_eq!(SubscriberState::Closed.to_string(), "closed");
    }

    #[test]
    fn close_message_carries_reason() {
        let Message::Close(Some(frame)) = close_message(close_code::AGAIN, "bye") else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, close_code::AGAIN);
        assert_eq!(frame.reason.as_str(), "bye");
    }
}
