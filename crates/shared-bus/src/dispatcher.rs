//! # Dispatcher - Ordered Handler Delivery
//!
//! Bridges a subscription to an async handler while keeping the per-photo
//! ordering guarantee: a router task forwards each matching event to one of
//! N shard workers chosen by `photo_id` hash, and every shard worker drains
//! its queue sequentially. Events for one photo therefore run through one
//! worker in emitter-sequence order; distinct photos deliver in parallel.
//!
//! Handler failures never escape the dispatcher. With `retry_on_error` set,
//! a failed invocation is retried with bounded exponential backoff before
//! being counted as failed and dropped.

use crate::publisher::InMemoryEventBus;
use crate::topic::TopicPattern;
use crate::DEFAULT_DELIVERY_SHARDS;
use shared_types::{PhotoEvent, PlatformError};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffered events per shard before the router backpressures.
const SHARD_QUEUE_CAPACITY: usize = 256;

/// First retry delay after a handler error.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Upper bound on the handler retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Options recognized on a handler subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Retry the handler on error.
    pub retry_on_error: bool,
    /// Maximum retries per event (ignored unless `retry_on_error`).
    pub max_retries: u32,
    /// Per-invocation timeout; a timed-out invocation counts as an error.
    pub timeout: Option<Duration>,
    /// Number of per-photo delivery shards.
    pub shards: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            retry_on_error: false,
            max_retries: 0,
            timeout: None,
            shards: DEFAULT_DELIVERY_SHARDS,
        }
    }
}

/// Boxed future returned by event handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), PlatformError>> + Send>>;

/// An async event handler.
pub type EventHandler = Arc<dyn Fn(PhotoEvent) -> HandlerFuture + Send + Sync>;

/// A running subscription with sharded, ordered handler delivery.
pub struct Dispatcher {
    router: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    handled: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Subscribe to `pattern` on `bus` and deliver matches to `handler`.
    #[must_use]
    pub fn spawn(
        bus: &InMemoryEventBus,
        pattern: TopicPattern,
        options: SubscriptionOptions,
        handler: EventHandler,
    ) -> Self {
        let shard_count = options.shards.max(1);
        let mut subscription = bus.subscribe(pattern);
        let handled = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let mut senders = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, mut rx) = mpsc::channel::<PhotoEvent>(SHARD_QUEUE_CAPACITY);
            senders.push(tx);

            let handler = handler.clone();
            let options = options.clone();
            let handled = handled.clone();
            let failed = failed.clone();
            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    deliver(shard, event, &handler, &options, &handled, &failed).await;
                }
            }));
        }

        let router = tokio::spawn(async move {
            while let Ok(event) = subscription.recv().await {
                let shard = shard_index(&event, shard_count);
                if senders[shard].send(event).await.is_err() {
                    break;
                }
            }
            // Dropping the senders closes every shard queue.
        });

        Self {
            router,
            workers,
            handled,
            failed,
        }
    }

    /// Events successfully handled.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Events dropped after handler failure.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop receiving, then drain the shard queues to completion.
    pub async fn shutdown(self) {
        self.router.abort();
        let _ = self.router.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Pick the delivery shard: photo-scoped events hash their `photo_id` so one
/// photo always lands on one shard; system events hash the event id.
fn shard_index(event: &PhotoEvent, shard_count: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    match event.photo_id() {
        Some(photo_id) => photo_id.hash(&mut hasher),
        None => event.id.hash(&mut hasher),
    }
    (hasher.finish() as usize) % shard_count
}

async fn deliver(
    shard: usize,
    event: PhotoEvent,
    handler: &EventHandler,
    options: &SubscriptionOptions,
    handled: &AtomicU64,
    failed: &AtomicU64,
) {
    let max_attempts = if options.retry_on_error {
        options.max_retries.saturating_add(1)
    } else {
        1
    };

    let mut delay = RETRY_BASE_DELAY;
    for attempt in 1..=max_attempts {
        let invocation = handler(event.clone());
        let result = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Timeout {
                    operation: format!("handler for {}", event.topic()),
                    elapsed_ms: limit.as_millis() as u64,
                }),
            },
            None => invocation.await,
        };

        match result {
            Ok(()) => {
                handled.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) if attempt < max_attempts => {
                debug!(
                    shard,
                    event_id = %event.id,
                    topic = event.topic(),
                    attempt,
                    %error,
                    "Handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
            Err(error) => {
                failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    shard,
                    event_id = %event.id,
                    topic = event.topic(),
                    attempts = attempt,
                    %error,
                    "Handler failed, event dropped"
                );
                return;
            }
        }
    }
}
