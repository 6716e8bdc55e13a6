//! # Event Envelope
//!
//! The wire-level event schema shared by every producer and consumer:
//!
//! ```json
//! {
//!   "id": "…",
//!   "type": "photo.processing.stage.completed",
//!   "data": { … },
//!   "metadata": {
//!     "source": "worker-1",
//!     "timestamp": "2026-08-01T12:00:00Z",
//!     "trace_id": "…",
//!     "client_id": "c1",
//!     "photo_id": "…",
//!     "sequence": 4
//!   }
//! }
//! ```
//!
//! Consumers ignore unknown fields. Delivery is at-least-once; handlers are
//! expected to be idempotent per `id`.

use crate::ids::{ClientId, PhotoId, SessionId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// EVENT KINDS
// =============================================================================

/// Typed identifiers for every event the platform emits.
///
/// The dotted rendering in [`EventKind::topic`] is the subscription key;
/// patterns with a trailing `*` segment match whole topic families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventKind {
    /// Ingress accepted an upload (per-photo sequence 1).
    PhotoUploaded,
    /// A worker claimed the photo and started the pipeline.
    ProcessingStarted,
    /// One pipeline stage finished.
    StageCompleted,
    /// The whole pipeline finished.
    ProcessingCompleted,
    /// The pipeline failed terminally.
    ProcessingFailed,
    /// Cooperative cancellation reached the photo.
    PhotoCancelled,
    /// The photo and its derived blobs were deleted.
    PhotoDeleted,
    /// Periodic health snapshot.
    SystemHealth,
    /// The platform is shutting down.
    SystemShutdown,
}

impl EventKind {
    /// Dotted topic string used for routing and subscription.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::PhotoUploaded => "photo.uploaded",
            Self::ProcessingStarted => "photo.processing.started",
            Self::StageCompleted => "photo.processing.stage.completed",
            Self::ProcessingCompleted => "photo.processing.completed",
            Self::ProcessingFailed => "photo.processing.failed",
            Self::PhotoCancelled => "photo.cancelled",
            Self::PhotoDeleted => "photo.deleted",
            Self::SystemHealth => "system.health",
            Self::SystemShutdown => "system.shutdown",
        }
    }

    /// Parse a dotted topic back into a kind.
    #[must_use]
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            "photo.uploaded" => Some(Self::PhotoUploaded),
            "photo.processing.started" => Some(Self::ProcessingStarted),
            "photo.processing.stage.completed" => Some(Self::StageCompleted),
            "photo.processing.completed" => Some(Self::ProcessingCompleted),
            "photo.processing.failed" => Some(Self::ProcessingFailed),
            "photo.cancelled" => Some(Self::PhotoCancelled),
            "photo.deleted" => Some(Self::PhotoDeleted),
            "system.health" => Some(Self::SystemHealth),
            "system.shutdown" => Some(Self::SystemShutdown),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.topic().to_string()
    }
}

impl TryFrom<String> for EventKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_topic(&value).ok_or_else(|| format!("unknown event type '{value}'"))
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Routing and causality context attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Emitting component ("ingress", "worker-2", ...).
    pub source: String,
    /// Emission time, RFC3339 UTC.
    pub timestamp: DateTime<Utc>,
    /// Trace id propagated from the originating upload.
    pub trace_id: TraceId,
    /// Uploading client, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<ClientId>,
    /// Upload session, when known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<SessionId>,
    /// Photo the event concerns, when any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub photo_id: Option<PhotoId>,
    /// Per-photo monotonic sequence issued by the mutation-right holder.
    pub sequence: u64,
}

impl EventMetadata {
    /// Metadata for a photo-scoped event.
    #[must_use]
    pub fn for_photo(
        source: impl Into<String>,
        trace_id: TraceId,
        photo_id: PhotoId,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            timestamp: now,
            trace_id,
            client_id: None,
            session_id: None,
            photo_id: Some(photo_id),
            sequence,
        }
    }

    /// Metadata for a system-scoped event (no photo, sequence 0).
    #[must_use]
    pub fn for_system(source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            timestamp: now,
            trace_id: TraceId::generate(),
            client_id: None,
            session_id: None,
            photo_id: None,
            sequence: 0,
        }
    }

    /// Attach the client id.
    #[must_use]
    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Attach the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoEvent {
    /// Unique event id; consumers deduplicate redeliveries on it.
    pub id: Uuid,
    /// Typed event kind, rendered as the dotted topic string.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// Routing and causality context.
    pub metadata: EventMetadata,
}

impl PhotoEvent {
    /// Build a new event with a fresh id.
    #[must_use]
    pub fn new(kind: EventKind, data: serde_json::Value, metadata: EventMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            data,
            metadata,
        }
    }

    /// The photo this event concerns, when any.
    #[must_use]
    pub fn photo_id(&self) -> Option<PhotoId> {
        self.metadata.photo_id
    }

    /// The dotted topic for routing.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}
