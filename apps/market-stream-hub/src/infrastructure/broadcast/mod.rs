//! Broadcast Hub
//!
//! Fans out envelopes to downstream subscribers through a single control
//! loop that owns the subscriber registry.
//!
//! # Architecture
//!
//! ```text
//! register ──┐
//! unregister ├──► command queue ──► control loop ──try_send──► subscriber queue 1
//! publish ───┘                        (registry)  ──try_send──► subscriber queue N
//! ```
//!
//! Every subscriber has its own bounded queue. The hub never waits on a
//! subscriber: a queue that is full when an envelope is published means
//! the subscriber cannot keep up, so it is removed and its queue closed.
//! Envelopes are `Arc`-shared, so fan-out never copies the payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EnvelopePublisher, PublishError};
use crate::domain::streaming::SharedEnvelope;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broadcast hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Capacity of the control loop's command queue.
    pub command_capacity: usize,
    /// Default capacity of each subscriber queue.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1_024,
            subscriber_capacity: 256,
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Identifier assigned to each registered subscriber.
pub type SubscriberId = u64;

/// Errors returned by hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The control loop has stopped.
    #[error("broadcast hub is closed")]
    Closed,
}

impl From<HubError> for PublishError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Closed => Self::HubClosed,
        }
    }
}

/// A registered subscriber's end of its queue.
#[derive(Debug)]
pub struct Subscription {
    /// Identifier used to unregister.
    pub id: SubscriberId,
    /// Envelopes published after registration, in publish order.
    pub receiver: mpsc::Receiver<SharedEnvelope>,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Envelopes accepted by the control loop.
    pub published: u64,
    /// Subscribers removed because their queue was full.
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct HubCounters {
    subscribers: AtomicUsize,
    published: AtomicU64,
    evicted: AtomicU64,
}

enum HubCommand {
    Register {
        id: SubscriberId,
        queue: mpsc::Sender<SharedEnvelope>,
    },
    Unregister {
        id: SubscriberId,
    },
    Publish(SharedEnvelope),
    Count(oneshot::Sender<usize>),
}

// =============================================================================
// Hub Handle
// =============================================================================

/// Handle to the broadcast hub's control loop.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use market_stream_hub::domain::streaming::{BroadcastEnvelope, EnvelopeKind};
/// use market_stream_hub::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let hub = BroadcastHub::spawn(BroadcastConfig::default(), CancellationToken::new());
///     let mut subscription = hub.register().await.unwrap();
///
///     let envelope = BroadcastEnvelope::new(EnvelopeKind::Ticker, None, serde_json::json!({}));
///     hub.broadcast(Arc::new(envelope)).await.unwrap();
///
///     let received = subscription.receiver.recv().await;
///     assert!(received.is_some());
/// }
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    commands: mpsc::Sender<HubCommand>,
    config: BroadcastConfig,
    next_id: AtomicU64,
    counters: Arc<HubCounters>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { id, .. } => f.debug_struct("Register").field("id", id).finish(),
            Self::Unregister { id } => f.debug_struct("Unregister").field("id", id).finish(),
            Self::Publish(envelope) => f.debug_tuple("Publish").field(&envelope.kind).finish(),
            Self::Count(_) => f.write_str("Count"),
        }
    }
}

impl BroadcastHub {
    /// Start the control loop and return a handle to it.
    ///
    /// The loop runs until `cancel` fires or every handle is dropped. On
    /// exit all subscriber queues are closed.
    #[must_use]
    pub fn spawn(config: BroadcastConfig, cancel: CancellationToken) -> Arc<Self> {
        let (commands, inbox) = mpsc::channel(config.command_capacity.max(1));
        let counters = Arc::new(HubCounters::default());

        let actor = HubActor {
            subscribers: HashMap::new(),
            counters: Arc::clone(&counters),
        };
        tokio::spawn(actor.run(inbox, cancel));

        Arc::new(Self {
            commands,
            config,
            next_id: AtomicU64::new(1),
            counters,
        })
    }

    /// Register a subscriber with the default queue capacity.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the control loop has stopped.
    pub async fn register(&self) -> Result<Subscription, HubError> {
        self.register_with_capacity(self.config.subscriber_capacity)
            .await
    }

    /// Register a subscriber with a specific queue capacity.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the control loop has stopped.
    pub async fn register_with_capacity(&self, capacity: usize) -> Result<Subscription, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, receiver) = mpsc::channel(capacity.max(1));

        self.send(HubCommand::Register { id, queue }).await?;
        Ok(Subscription { id, receiver })
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the control loop has stopped.
    pub async fn unregister(&self, id: SubscriberId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { id }).await
    }

    /// Publish an envelope to every registered subscriber.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the control loop has stopped.
    pub async fn broadcast(&self, envelope: SharedEnvelope) -> Result<(), HubError> {
        self.send(HubCommand::Publish(envelope)).await
    }

    /// Number of registered subscribers, as seen by the control loop.
    ///
    /// The answer reflects every command sent before this call.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the control loop has stopped.
    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::Count(reply)).await?;
        answer.await.map_err(|_| HubError::Closed)
    }

    /// Lock-free snapshot of the hub counters.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Whether the control loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

#[async_trait]
impl EnvelopePublisher for BroadcastHub {
    async fn publish(&self, envelope: SharedEnvelope) -> Result<(), PublishError> {
        Ok(self.broadcast(envelope).await?)
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

// =============================================================================
// Control Loop
// =============================================================================

struct HubActor {
    subscribers: HashMap<SubscriberId, mpsc::Sender<SharedEnvelope>>,
    counters: Arc<HubCounters>,
}

impl HubActor {
    async fn run(mut self, mut inbox: mpsc::Receiver<HubCommand>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Broadcast hub cancelled");
                    break;
                }
                command = inbox.recv() => command,
            };

            match command {
                Some(command) => self.handle(command),
                None => {
                    tracing::debug!("All hub handles dropped");
                    break;
                }
            }
        }

        let closed = self.subscribers.len();
        self.subscribers.clear();
        self.sync_count();
        tracing::info!(closed, "Broadcast hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { id, queue } => {
                self.subscribers.insert(id, queue);
                tracing::debug!(id, total = self.subscribers.len(), "Subscriber registered");
            }
            HubCommand::Unregister { id } => {
                if self.subscribers.remove(&id).is_some() {
                    tracing::debug!(id, total = self.subscribers.len(), "Subscriber unregistered");
                }
            }
            HubCommand::Publish(envelope) => self.fan_out(&envelope),
            HubCommand::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
        self.sync_count();
    }

    fn fan_out(&mut self, envelope: &SharedEnvelope) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_envelope_published(envelope.kind.as_str());

        let mut dropped = Vec::new();
        for (id, queue) in &self.subscribers {
            match queue.try_send(Arc::clone(envelope)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(id = *id, "Subscriber queue full; disconnecting slow consumer");
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    metrics::record_subscriber_evicted();
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(id = *id, "Subscriber queue closed");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.subscribers.remove(&id);
        }
    }

    fn sync_count(&self) {
        let count = self.subscribers.len();
        self.counters.subscribers.store(count, Ordering::Relaxed);
        metrics::set_subscriber_count(count);
    }
}

// =============================================================================
// Tests
// =============================================================================
