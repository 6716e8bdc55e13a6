//! # Client Connections
//!
//! The fabric's view of a connected client. The real transport (a
//! websocket-like stream) lives outside this crate; anything that can
//! accept an event frame can register.

use async_trait::async_trait;
use shared_types::PhotoEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors delivering to a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FabricError {
    /// The connection's transport is gone.
    #[error("connection {0} closed")]
    ConnectionClosed(Uuid),

    /// The connection's send buffer is full.
    #[error("connection {0} backpressured")]
    Backpressure(Uuid),
}

/// A destination the router can push event frames into.
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// Stable id for room membership.
    fn connection_id(&self) -> Uuid;

    /// Push one event frame.
    async fn send(&self, event: &PhotoEvent) -> Result<(), FabricError>;
}

/// Channel-backed connection used by the single-node runtime and tests.
/// The receiving half stands in for the client's socket.
pub struct ChannelConnection {
    id: Uuid,
    tx: mpsc::Sender<PhotoEvent>,
}

impl ChannelConnection {
    /// Create a connection and hand back the client half.
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<PhotoEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl ClientConnection for ChannelConnection {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    async fn send(&self, event: &PhotoEvent) -> Result<(), FabricError> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(FabricError::Backpressure(self.id)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(FabricError::ConnectionClosed(self.id))
            }
        }
    }
}
