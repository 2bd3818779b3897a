use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, RoomId, ServerMessage, UNKNOWN_DISPLAY_NAME};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::debug;

/// One live client session as seen by the registry and relay.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    display_name: OnceLock<String>,
    room: Mutex<Option<RoomId>>,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbox: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            display_name: OnceLock::new(),
            room: Mutex::new(None),
            outbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.get().map(String::as_str)
    }

    pub fn display_name_or_unknown(&self) -> String {
        self.display_name()
            .unwrap_or(UNKNOWN_DISPLAY_NAME)
            .to_string()
    }

    /// The first name wins for the rest of the session.
    pub fn set_display_name(&self, name: &str) {
        if self.display_name.set(name.to_string()).is_err() {
            debug!(
                "Connection {} keeps display name {:?}, ignoring {:?}",
                self.id,
                self.display_name(),
                name
            );
        }
    }

    pub fn room(&self) -> Option<RoomId> {
        self.room.lock().clone()
    }

    pub(crate) fn set_room(&self, room: Option<RoomId>) {
        *self.room.lock() = room;
    }

    pub(crate) fn take_room(&self) -> Option<RoomId> {
        self.room.lock().take()
    }

    /// Fire-and-forget delivery. A closed outbox means the peer is gone.
    pub fn send(&self, msg: ServerMessage) -> Result<()> {
        self.outbox
            .send(msg)
            .map_err(|_| Error::StaleTarget(self.id.clone()))
    }
}

/// Live connections by identifier.
#[derive(Debug, Default)]
pub struct Connections {
    inner: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, outbox: mpsc::UnboundedSender<ServerMessage>) -> Arc<Connection> {
        let id = uuid::Uuid::new_v4().to_string();
        let connection = Arc::new(Connection::new(id.clone(), outbox));
        self.inner.write().insert(id, Arc::clone(&connection));
        connection
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_set_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new("c1".into(), tx);
        assert_eq!(conn.display_name_or_unknown(), UNKNOWN_DISPLAY_NAME);
        conn.set_display_name("Alice");
        conn.set_display_name("Mallory");
        assert_eq!(conn.display_name(), Some("Alice"));
    }

    #[test]
    fn test_send_to_closed_outbox_is_stale() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new("c1".into(), tx);
        drop(rx);
        let err = conn
            .send(ServerMessage::RoomCreated {
                room_id: "r".into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::StaleTarget(id) if id == "c1"));
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let connections = Connections::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = connections.register(tx.clone());
        let b = connections.register(tx);
        assert_ne!(a.id(), b.id());
        assert_eq!(connections.len(), 2);
        connections.remove(a.id());
        assert!(connections.get(a.id()).is_none());
        assert!(connections.get(b.id()).is_some());
    }
}
