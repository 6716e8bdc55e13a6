//! # Room Router
//!
//! Holds the connection registry and room memberships, and routes every bus
//! event to the union of its rooms' members. Attached to the bus through a
//! photo-sharded dispatcher so one photo's events arrive at each client in
//! emitter-sequence order.

use crate::connection::ClientConnection;
use crate::rooms::{rooms_for, RoomId};
use async_trait::async_trait;
use shared_bus::{Dispatcher, InMemoryEventBus, SubscriptionOptions, TopicPattern};
use shared_types::{
    ClientId, Component, ComponentError, ComponentHealth, ComponentStatus, PhotoEvent, PhotoId,
    SessionId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct RouterInner {
    connections: RwLock<HashMap<Uuid, Arc<dyn ClientConnection>>>,
    rooms: RwLock<HashMap<RoomId, HashSet<Uuid>>>,
    /// Reverse index for O(memberships) disconnect cleanup.
    memberships: RwLock<HashMap<Uuid, HashSet<RoomId>>>,
    delivered: AtomicU64,
    send_failures: AtomicU64,
}

impl RouterInner {
    fn join(&self, connection_id: Uuid, room: RoomId) {
        self.rooms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(room.clone())
            .or_default()
            .insert(connection_id);
        self.memberships
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(connection_id)
            .or_default()
            .insert(room);
    }

    fn leave(&self, connection_id: Uuid, room: &RoomId) {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        if let Some(joined) = self
            .memberships
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&connection_id)
        {
            joined.remove(room);
        }
    }

    async fn route(&self, event: &PhotoEvent) {
        let rooms = rooms_for(event);
        if rooms.is_empty() {
            return;
        }

        // Union of members across the matched rooms; each connection gets
        // the event once even if it sits in several rooms.
        let targets: Vec<Arc<dyn ClientConnection>> = {
            let room_map = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
            let mut ids: HashSet<Uuid> = HashSet::new();
            for room in &rooms {
                if let Some(members) = room_map.get(room) {
                    ids.extend(members.iter().copied());
                }
            }
            ids.iter()
                .filter_map(|id| connections.get(id).cloned())
                .collect()
        };

        for connection in targets {
            match connection.send(event).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(send_err) => {
                    self.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        connection = %connection.connection_id(),
                        topic = event.topic(),
                        %send_err,
                        "event delivery to client failed"
                    );
                }
            }
        }
    }
}

/// The room router component.
#[derive(Clone)]
pub struct RoomRouter {
    inner: Arc<RouterInner>,
    bus: Arc<InMemoryEventBus>,
    dispatcher: Arc<StdMutex<Option<Dispatcher>>>,
}

impl RoomRouter {
    /// Create a router over the bus. Routing starts with `start()`.
    #[must_use]
    pub fn new(bus: Arc<InMemoryEventBus>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                memberships: RwLock::new(HashMap::new()),
                delivered: AtomicU64::new(0),
                send_failures: AtomicU64::new(0),
            }),
            bus,
            dispatcher: Arc::new(StdMutex::new(None)),
        }
    }

    /// Register a connection. It joins the broadcast room immediately;
    /// client/session rooms come with `identify`.
    pub fn connect(&self, connection: Arc<dyn ClientConnection>) {
        let connection_id = connection.connection_id();
        self.inner
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id, connection);
        self.inner.join(connection_id, RoomId::Broadcast);
        debug!(%connection_id, "client connected");
    }

    /// Bind a connection to its client (and optionally session) rooms.
    pub fn identify(
        &self,
        connection_id: Uuid,
        client_id: ClientId,
        session_id: Option<SessionId>,
    ) {
        self.inner.join(connection_id, RoomId::Client(client_id));
        if let Some(session_id) = session_id {
            self.inner.join(connection_id, RoomId::Session(session_id));
        }
        debug!(%connection_id, "client identified");
    }

    /// Follow one photo's lifecycle.
    pub fn subscribe_photo(&self, connection_id: Uuid, photo_id: PhotoId) {
        self.inner.join(connection_id, RoomId::Photo(photo_id));
    }

    /// Stop following a photo.
    pub fn unsubscribe_photo(&self, connection_id: Uuid, photo_id: PhotoId) {
        self.inner.leave(connection_id, &RoomId::Photo(photo_id));
    }

    /// Drop a connection and every membership it held.
    pub fn disconnect(&self, connection_id: Uuid) {
        self.inner
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&connection_id);
        let joined = self
            .inner
            .memberships
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&connection_id)
            .unwrap_or_default();
        let mut rooms = self.inner.rooms.write().unwrap_or_else(|e| e.into_inner());
        for room in joined {
            if let Some(members) = rooms.get_mut(&room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
        debug!(%connection_id, "client disconnected");
    }

    /// Connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Events delivered to clients.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries that failed (closed or backpressured connections).
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.inner.send_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Component for RoomRouter {
    fn name(&self) -> &'static str {
        "event-fabric"
    }

    async fn start(&self) -> Result<(), ComponentError> {
        let inner = self.inner.clone();
        let dispatcher = Dispatcher::spawn(
            &self.bus,
            TopicPattern::all(),
            SubscriptionOptions::default(),
            Arc::new(move |event: PhotoEvent| {
                let inner = inner.clone();
                Box::pin(async move {
                    inner.route(&event).await;
                    Ok(())
                }) as shared_bus::dispatcher::HandlerFuture
            }),
        );
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
        info!("event fabric routing started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown().await;
        }
        info!("event fabric stopped");
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        let routing = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        ComponentHealth {
            name: self.name().to_string(),
            status: if routing {
                ComponentStatus::Healthy
            } else {
                ComponentStatus::Stopped
            },
            details: serde_json::json!({
                "connections": self.connection_count(),
                "delivered": self.delivered(),
                "send_failures": self.send_failures(),
            }),
        }
    }
}
