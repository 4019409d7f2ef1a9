//! In-process event bus
//!
//! Publishes envelopes to subscribers whose topic pattern matches the
//! envelope type. Topics are the colon separated segments of the type:
//!
//! - `search:search:v1:requested` - Specific event
//! - `search:*:v1:requested` - Any search action, version 1, requested
//! - `messaging:#` - Every messaging event
//! - `#` - All events
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments
//!
//! Suitable for single-process deployments and tests; a networked transport
//! plugs in behind the same publish contract.

use crate::envelope::EventEnvelope;
use crate::router::{ActionRouter, RouterError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// Subscriber fell behind and missed events
    #[error("Subscriber lagged, {0} events skipped")]
    Lagged(u64),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Subscription handle for receiving envelopes.
#[derive(Debug)]
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Topic pattern
    pub topic: String,
    /// Envelope receiver
    pub receiver: broadcast::Receiver<EventEnvelope>,
}

impl Subscription {
    /// Receive the next envelope.
    pub async fn recv(&mut self) -> EventBusResult<EventEnvelope> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            broadcast::error::RecvError::Closed => EventBusError::ChannelClosed,
        })
    }
}

/// Publish/subscribe contract.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an envelope, returning the delivery id.
    async fn publish(&self, envelope: EventEnvelope) -> EventBusResult<String>;

    /// Subscribe to a topic pattern.
    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription>;

    /// Drop a subscription.
    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()>;

    /// Get event bus stats.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total envelopes published
    pub events_published: u64,
    /// Total deliveries to subscriber channels
    pub events_delivered: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

/// In-memory event bus implementation.
pub struct MemoryEventBus {
    /// Pattern -> channel
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<EventEnvelope>>>>,
    /// Subscription id -> pattern
    subscriptions: Arc<RwLock<HashMap<String, String>>>,
    /// Statistics
    stats: Arc<RwLock<EventBusStats>>,
    /// Per-pattern channel capacity
    channel_capacity: usize,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            channel_capacity: capacity.max(1),
        }
    }

    /// Check if an event type matches a topic pattern.
    pub fn topic_matches(pattern: &str, event_type: &str) -> bool {
        let pattern_parts: Vec<&str> = pattern.split(':').collect();
        let topic_parts: Vec<&str> = event_type.split(':').collect();
        segments_match(&pattern_parts, &topic_parts)
    }
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.first(), topic.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            let rest = &pattern[1..];
            rest.is_empty() || (0..=topic.len()).any(|i| segments_match(rest, &topic[i..]))
        }
        (Some(&"*"), Some(_)) => segments_match(&pattern[1..], &topic[1..]),
        (Some(p), Some(t)) if p == t => segments_match(&pattern[1..], &topic[1..]),
        _ => false,
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> EventBusResult<String> {
        let delivery_id = uuid::Uuid::now_v7().to_string();
        let mut delivered = 0u64;

        {
            let channels = self.channels.read().await;
            for (pattern, sender) in channels.iter() {
                if Self::topic_matches(pattern, &envelope.event_type) {
                    // Err only means no live receiver on this pattern
                    if let Ok(n) = sender.send(envelope.clone()) {
                        delivered += n as u64;
                    }
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.events_published += 1;
            stats.events_delivered += delivered;
        }

        tracing::debug!(
            event_type = %envelope.event_type,
            delivery_id = %delivery_id,
            receivers = delivered,
            "Envelope published"
        );

        Ok(delivery_id)
    }

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription> {
        if topic.is_empty() {
            return Err(EventBusError::SubscribeError("topic pattern is empty".to_string()));
        }
        let id = uuid::Uuid::now_v7().to_string();

        let receiver = {
            let mut channels = self.channels.write().await;
            match channels.get(topic) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (sender, receiver) = broadcast::channel(self.channel_capacity);
                    channels.insert(topic.to_string(), sender);
                    receiver
                }
            }
        };

        self.subscriptions
            .write()
            .await
            .insert(id.clone(), topic.to_string());
        self.stats.write().await.active_subscriptions += 1;

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()> {
        let Some(pattern) = self.subscriptions.write().await.remove(subscription_id) else {
            return Ok(());
        };

        {
            let mut channels = self.channels.write().await;
            let idle = channels
                .get(&pattern)
                .map(|sender| sender.receiver_count() == 0)
                .unwrap_or(false);
            if idle {
                channels.remove(&pattern);
            }
        }

        let mut stats = self.stats.write().await;
        stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
        Ok(())
    }

    async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

/// Feed a subscription into an [`ActionRouter`] until the channel closes.
///
/// Handler failures are logged and do not stop the loop.
pub fn spawn_dispatch(mut subscription: Subscription, router: Arc<ActionRouter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(envelope) => {
                    if let Err(RouterError::Handler { event_type, source }) =
                        router.dispatch(envelope).await
                    {
                        tracing::error!(
                            service = %router.service(),
                            event_type = %event_type,
                            error = %source,
                            "Inbound event handling failed"
                        );
                    }
                }
                Err(EventBusError::Lagged(skipped)) => {
                    tracing::warn!(
                        service = %router.service(),
                        topic = %subscription.topic,
                        skipped,
                        "Subscriber lagged behind the bus"
                    );
                }
                Err(_) => break,
            }
        }
        tracing::debug!(service = %router.service(), topic = %subscription.topic, "Dispatch loop stopped");
    })
}
