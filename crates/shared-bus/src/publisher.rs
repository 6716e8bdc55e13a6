//! # Event Publisher
//!
//! The publishing side of the event bus.

use crate::subscriber::{EventStream, SubscriberRegistry, Subscription};
use crate::topic::TopicPattern;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use shared_types::PhotoEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors from publish operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The backing transport is disconnected. The caller decides whether to
    /// retry or surface.
    #[error("event transport unavailable")]
    TransportUnavailable,
}

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted for publication.
    pub published: u64,
    /// Events received by matching subscribers.
    pub delivered: u64,
    /// Publishes that found no live subscriber.
    pub dropped_no_subscriber: u64,
    /// Currently live subscriptions.
    pub active_subscriptions: usize,
    /// Result of the last transport ping.
    pub transport_connected: bool,
}

/// Trait for publishing events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to all matching subscriptions.
    ///
    /// # Returns
    ///
    /// The number of live subscribers the transport handed the event to.
    /// Zero subscribers is not an error; the event is dropped silently.
    ///
    /// # Errors
    ///
    /// `TransportUnavailable` while the transport is disconnected.
    async fn publish(&self, event: PhotoEvent) -> Result<usize, BusError>;

    /// Total events published.
    fn events_published(&self) -> u64;
}

/// In-memory implementation of the event bus.
///
/// Uses `tokio::sync::broadcast` for multi-producer, multi-consumer
/// semantics. Suitable for single-node operation; a distributed deployment
/// would back this with an external transport behind the same trait.
pub struct InMemoryEventBus {
    /// Broadcast sender for events.
    sender: broadcast::Sender<PhotoEvent>,

    /// Simulated transport link state. Disconnected buses refuse publishes.
    connected: AtomicBool,

    /// Enrollment bookkeeping shared with every subscriber handle.
    registry: Arc<SubscriberRegistry>,

    /// Total events published.
    published: AtomicU64,

    /// Publishes that found no subscriber.
    dropped_no_subscriber: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connected: AtomicBool::new(true),
            registry: Arc::new(SubscriberRegistry::new()),
            published: AtomicU64::new(0),
            dropped_no_subscriber: AtomicU64::new(0),
            capacity,
        }
    }

    /// Subscribe to events matching a pattern. The handle's registry ticket
    /// retires itself on drop.
    #[must_use]
    pub fn subscribe(&self, pattern: TopicPattern) -> Subscription {
        Subscription::open(
            self.registry.enroll(&pattern),
            pattern,
            self.sender.subscribe(),
        )
    }

    /// Subscribe as a `Stream`, for combinator-style consumers.
    #[must_use]
    pub fn event_stream(&self, pattern: TopicPattern) -> EventStream {
        EventStream::open(
            self.registry.enroll(&pattern),
            pattern,
            self.sender.subscribe(),
        )
    }

    /// Flip the simulated transport link. Used by fault-injection tests and
    /// by the runtime when an external transport reports loss.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Ping the transport.
    #[must_use]
    pub fn ping(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live subscriber handles (subscriptions and streams).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.registry.delivered(),
            dropped_no_subscriber: self.dropped_no_subscriber.load(Ordering::Relaxed),
            active_subscriptions: self.registry.active_count(),
            transport_connected: self.ping(),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: PhotoEvent) -> Result<usize, BusError> {
        if !self.ping() {
            return Err(BusError::TransportUnavailable);
        }

        let topic = event.topic();
        self.published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receiver_count) => {
                debug!(topic, receivers = receiver_count, "Event published");
                Ok(receiver_count)
            }
            Err(e) => {
                // No receivers. Not an error: unmatched events are discarded.
                self.dropped_no_subscriber.fetch_add(1, Ordering::Relaxed);
                debug!(topic, error = %e, "Event dropped (no receivers)");
                Ok(0)
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
