//! # Event Subscriber
//!
//! The subscription side of the event bus.
//!
//! Every live consumer holds an [`Enrollment`]: an RAII ticket issued by the
//! bus-wide [`SubscriberRegistry`]. Retiring is automatic when the ticket
//! drops, so neither [`Subscription`] nor [`EventStream`] needs its own
//! cleanup logic. The registry is also where delivery counting lives; a
//! subscription only tracks what it alone can know, the events its pattern
//! screened out and the events it lost to lag.

use crate::topic::TopicPattern;
use shared_types::PhotoEvent;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, trace};

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed.
    #[error("event bus closed")]
    Closed,
}

/// Bus-wide accounting of live subscribers.
///
/// Tracks enrollments by numeric id rather than by pattern, so two
/// subscriptions to the same pattern are distinct entries and the active
/// count is simply the map size.
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    active: Mutex<BTreeMap<u64, String>>,
    delivered: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(BTreeMap::new()),
            delivered: AtomicU64::new(0),
        }
    }

    /// Issue a ticket for a new subscriber.
    pub(crate) fn enroll(self: &Arc<Self>, pattern: &TopicPattern) -> Enrollment {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, pattern.render());
        debug!(subscriber = id, pattern = %pattern.render(), "subscriber enrolled");
        Enrollment {
            id,
            registry: self.clone(),
        }
    }

    /// Live subscriber count.
    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Events handed to matching subscribers so far.
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn retire(&self, id: u64) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        debug!(subscriber = id, "subscriber retired");
    }
}

/// RAII ticket for one live subscriber. Dropping it retires the entry.
pub(crate) struct Enrollment {
    id: u64,
    registry: Arc<SubscriberRegistry>,
}

impl Enrollment {
    /// Record one successful delivery on the bus-wide counter.
    pub(crate) fn tally_delivery(&self) {
        self.registry.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Enrollment {
    fn drop(&mut self) {
        self.registry.retire(self.id);
    }
}

/// A handle for receiving pattern-matched events.
pub struct Subscription {
    enrollment: Enrollment,
    pattern: TopicPattern,
    receiver: broadcast::Receiver<PhotoEvent>,
    /// Events this subscription saw and rejected by pattern.
    filtered_out: u64,
    /// Events this subscription lost by falling behind the bus.
    lost_to_lag: u64,
}

impl Subscription {
    pub(crate) fn open(
        enrollment: Enrollment,
        pattern: TopicPattern,
        receiver: broadcast::Receiver<PhotoEvent>,
    ) -> Self {
        Self {
            enrollment,
            pattern,
            receiver,
            filtered_out: 0,
            lost_to_lag: 0,
        }
    }

    /// Screen one raw bus event: count and pass a match, count and swallow
    /// a miss. Shared by the blocking and non-blocking receive paths.
    fn screen(&mut self, event: PhotoEvent) -> Option<PhotoEvent> {
        if self.pattern.matches(event.topic()) {
            self.enrollment.tally_delivery();
            Some(event)
        } else {
            self.filtered_out += 1;
            None
        }
    }

    /// Wait for the next event matching the pattern.
    ///
    /// # Errors
    ///
    /// `Closed` once the bus has been dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Result<PhotoEvent, SubscriptionError> {
        loop {
            let raw = match self.receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.lost_to_lag += missed;
                    trace!(missed, "subscription fell behind the bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
            };
            if let Some(hit) = self.screen(raw) {
                return Ok(hit);
            }
        }
    }

    /// Drain the next matching event without waiting.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when nothing is buffered right now.
    ///
    /// # Errors
    ///
    /// `Closed` once the bus has been dropped and the backlog is drained.
    pub fn try_recv(&mut self) -> Result<Option<PhotoEvent>, SubscriptionError> {
        loop {
            return match self.receiver.try_recv() {
                Ok(raw) => match self.screen(raw) {
                    Some(hit) => Ok(Some(hit)),
                    None => continue,
                },
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.lost_to_lag += missed;
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => Err(SubscriptionError::Closed),
            };
        }
    }

    /// The pattern for this subscription.
    #[must_use]
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Events rejected by the pattern so far.
    #[must_use]
    pub fn filtered_out(&self) -> u64 {
        self.filtered_out
    }

    /// Events lost to lag so far.
    #[must_use]
    pub fn lost_to_lag(&self) -> u64 {
        self.lost_to_lag
    }
}

/// A `Stream` of pattern-matched events, for combinator-style consumers.
///
/// Built on `tokio_stream`'s broadcast wrapper, so wakers are registered by
/// the underlying receiver; lagged stretches are skipped, not surfaced.
pub struct EventStream {
    inner: BroadcastStream<PhotoEvent>,
    pattern: TopicPattern,
    enrollment: Enrollment,
}

impl EventStream {
    pub(crate) fn open(
        enrollment: Enrollment,
        pattern: TopicPattern,
        receiver: broadcast::Receiver<PhotoEvent>,
    ) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern,
            enrollment,
        }
    }

    /// The pattern for this stream.
    #[must_use]
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }
}

impl Stream for EventStream {
    type Item = PhotoEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if this.pattern.matches(event.topic()) {
                        this.enrollment.tally_delivery();
                        return Poll::Ready(Some(event));
                    }
                    // Pattern miss: keep draining within this poll.
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{EventPublisher, InMemoryEventBus};
    use chrono::Utc;
    use shared_types::{EventKind, EventMetadata, PhotoId, TraceId};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    fn event_of(kind: EventKind) -> PhotoEvent {
        PhotoEvent::new(
            kind,
            serde_json::json!({}),
            EventMetadata::for_photo(
                "test",
                TraceId::generate(),
                PhotoId::generate(),
                1,
                Utc::now(),
            ),
        )
    }

    #[tokio::test]
    async fn test_recv_matching_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(TopicPattern::all());

        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(received.kind, EventKind::PhotoUploaded);
    }

    #[tokio::test]
    async fn test_pattern_misses_are_counted_not_delivered() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(TopicPattern::parse("photo.processing.*").expect("parse"));

        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");
        bus.publish(event_of(EventKind::ProcessingStarted))
            .await
            .expect("publish");

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(received.kind, EventKind::ProcessingStarted);
        assert_eq!(sub.filtered_out(), 1);
    }

    #[tokio::test]
    async fn test_enrollment_retires_on_drop() {
        let bus = InMemoryEventBus::new();

        {
            let _sub = bus.subscribe(TopicPattern::all());
            let _stream = bus.event_stream(TopicPattern::all());
            assert_eq!(bus.subscriber_count(), 2);
        }

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_try_recv_empty_then_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(TopicPattern::all());

        assert_eq!(sub.try_recv(), Ok(None));

        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");
        let drained = sub.try_recv().expect("open").expect("buffered");
        assert_eq!(drained.kind, EventKind::PhotoUploaded);
    }

    #[tokio::test]
    async fn test_closed_bus_surfaces_after_backlog() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(TopicPattern::all());
        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");
        drop(bus);

        // The buffered event still arrives, then the closure does.
        assert!(sub.try_recv().expect("backlog").is_some());
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
    }

    #[tokio::test]
    async fn test_delivered_counter_tracks_matches_only() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(TopicPattern::exact("photo.uploaded"));

        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");
        bus.publish(event_of(EventKind::ProcessingStarted))
            .await
            .expect("publish");

        let _ = sub.recv().await.expect("event");
        // Drain the miss too; it must not count as delivered.
        let _ = sub.try_recv();

        assert_eq!(bus.stats().delivered, 1);
        assert_eq!(sub.filtered_out(), 1);
    }

    #[tokio::test]
    async fn test_event_stream_filters_and_yields() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.event_stream(TopicPattern::parse("photo.processing.*").expect("parse"));

        bus.publish(event_of(EventKind::PhotoUploaded))
            .await
            .expect("publish");
        bus.publish(event_of(EventKind::StageCompleted))
            .await
            .expect("publish");

        let yielded = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timely")
            .expect("item");
        assert_eq!(yielded.kind, EventKind::StageCompleted);
    }

    #[tokio::test]
    async fn test_event_stream_ends_when_bus_drops() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.event_stream(TopicPattern::all());
        drop(bus);

        assert!(timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timely")
            .is_none());
    }
}
