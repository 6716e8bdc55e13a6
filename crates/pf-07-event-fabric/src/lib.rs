//! # Event Fabric - Room Router
//!
//! Subsystem 7. Subscribes to the internal event channel and fans lifecycle
//! events out to connected clients, grouped into rooms:
//!
//! - `photo:{photo_id}` - anyone following that photo's lifecycle
//! - `client:{client_id}` - all events for one client
//! - `session:{session_id}` - session-scoped broadcast
//! - `broadcast` - every connection
//!
//! Delivery preserves per-photo order end to end: the bus dispatcher's
//! photo-keyed shards drain one photo's events sequentially, and the router
//! forwards them synchronously inside the shard worker. There is no
//! per-client outbox; a reconnecting client replays state through ingress.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod connection;
pub mod rooms;
pub mod router;

// Re-export main types
pub use connection::{ChannelConnection, ClientConnection, FabricError};
pub use rooms::{rooms_for, RoomId};
pub use router::RoomRouter;
