//! # Shared Bus - Event Channel for Lifecycle Events
//!
//! The pub/sub layer that fans photo lifecycle events from producers
//! (ingress, workers) to in-process consumers (the event fabric, health
//! listeners, tests).
//!
//! ## Guarantees
//!
//! - **At-least-once** delivery to every subscription whose pattern matches;
//!   handlers deduplicate on `event.id`.
//! - **Per-photo order within a subscription**: dispatchers shard delivery by
//!   `photo_id`, so one photo's events drain through one worker task in
//!   emitter-sequence order.
//! - **Isolation**: a failing handler never affects other subscriptions.
//!
//! Publishing fails with `TransportUnavailable` while the backing transport
//! is disconnected; the caller decides whether to retry or surface.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod dispatcher;
pub mod publisher;
pub mod subscriber;
pub mod topic;

// Re-export main types
pub use dispatcher::{Dispatcher, EventHandler, SubscriptionOptions};
pub use publisher::{BusError, BusStats, EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};
pub use topic::TopicPattern;

/// Maximum events buffered per subscriber before the slowest one lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default number of per-photo delivery shards in a dispatcher.
pub const DEFAULT_DELIVERY_SHARDS: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1024);
    }

    #[test]
    fn test_default_shards_nonzero() {
        assert!(DEFAULT_DELIVERY_SHARDS > 0);
    }
}
