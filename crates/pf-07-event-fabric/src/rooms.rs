//! # Rooms and the Routing Table
//!
//! Which rooms see which events.

use shared_types::{ClientId, EventKind, PhotoEvent, PhotoId, SessionId};
use std::fmt;

/// A routing group of connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Followers of one photo's lifecycle.
    Photo(PhotoId),
    /// All events for one client.
    Client(ClientId),
    /// Session-scoped broadcast. In-memory only; the room dies with its
    /// connections.
    Session(SessionId),
    /// Every connection.
    Broadcast,
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photo(id) => write!(f, "photo:{id}"),
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// The routing rule table.
///
/// | Event | Rooms |
/// |---|---|
/// | `photo.uploaded` | client, session, photo |
/// | `photo.processing.*`, `photo.cancelled`, `photo.deleted` | photo, client |
/// | `system.*` | broadcast |
#[must_use]
pub fn rooms_for(event: &PhotoEvent) -> Vec<RoomId> {
    let mut rooms = Vec::with_capacity(3);
    match event.kind {
        EventKind::PhotoUploaded => {
            if let Some(client_id) = &event.metadata.client_id {
                rooms.push(RoomId::Client(client_id.clone()));
            }
            if let Some(session_id) = &event.metadata.session_id {
                rooms.push(RoomId::Session(session_id.clone()));
            }
            if let Some(photo_id) = event.metadata.photo_id {
                rooms.push(RoomId::Photo(photo_id));
            }
        }
        EventKind::ProcessingStarted
        | EventKind::StageCompleted
        | EventKind::ProcessingCompleted
        | EventKind::ProcessingFailed
        | EventKind::PhotoCancelled
        | EventKind::PhotoDeleted => {
            if let Some(photo_id) = event.metadata.photo_id {
                rooms.push(RoomId::Photo(photo_id));
            }
            if let Some(client_id) = &event.metadata.client_id {
                rooms.push(RoomId::Client(client_id.clone()));
            }
        }
        EventKind::SystemHealth | EventKind::SystemShutdown => {
            rooms.push(RoomId::Broadcast);
        }
    }
    rooms
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared_types::{EventMetadata, TraceId};

    fn event(kind: EventKind, with_session: bool) -> PhotoEvent {
        let mut metadata = EventMetadata::for_photo(
            "test",
            TraceId::generate(),
            PhotoId::generate(),
            1,
            Utc::now(),
        )
        .with_client(ClientId::from("c1"));
        if with_session {
            metadata = metadata.with_session(Some(SessionId::from("s1")));
        }
        PhotoEvent::new(kind, serde_json::json!({}), metadata)
    }

    #[test]
    fn test_uploaded_routes_to_all_three() {
        let rooms = rooms_for(&event(EventKind::PhotoUploaded, true));
        assert_eq!(rooms.len(), 3);
        assert!(rooms.iter().any(|r| matches!(r, RoomId::Client(_))));
        assert!(rooms.iter().any(|r| matches!(r, RoomId::Session(_))));
        assert!(rooms.iter().any(|r| matches!(r, RoomId::Photo(_))));
    }

    #[test]
    fn test_uploaded_without_session_skips_session_room() {
        let rooms = rooms_for(&event(EventKind::PhotoUploaded, false));
        assert_eq!(rooms.len(), 2);
        assert!(!rooms.iter().any(|r| matches!(r, RoomId::Session(_))));
    }

    #[test]
    fn test_processing_routes_to_photo_and_client() {
        for kind in [
            EventKind::ProcessingStarted,
            EventKind::StageCompleted,
            EventKind::ProcessingCompleted,
            EventKind::ProcessingFailed,
        ] {
            let rooms = rooms_for(&event(kind, true));
            assert_eq!(rooms.len(), 2, "{kind}");
            assert!(!rooms.iter().any(|r| matches!(r, RoomId::Session(_))));
        }
    }

    #[test]
    fn test_system_routes_to_broadcast() {
        let system_event = PhotoEvent::new(
            EventKind::SystemHealth,
            serde_json::json!({}),
            EventMetadata::for_system("runtime", Utc::now()),
        );
        assert_eq!(rooms_for(&system_event), vec![RoomId::Broadcast]);
    }
}
