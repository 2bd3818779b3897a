//! Room membership with per-room exclusive access.
//!
//! The index lock is only held long enough to look up, insert or unlink a
//! room handle; every membership read and write happens under that room's
//! own mutex. Presence notifications are sent while the room lock is held so
//! they are ordered the same way as the membership snapshots joiners get.

use super::state::Room;
use crate::error::{Error, Result};
use crate::protocol::{Member, RoomId, ServerMessage, UNKNOWN_DISPLAY_NAME};
use crate::server::{Connection, Connections, Relay};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Short random room token: 8 lowercase hex characters.
pub fn generate_room_id() -> RoomId {
    format!("{:08x}", rand::random::<u32>())
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
    connections: Arc<Connections>,
    relay: Relay,
    id_source: Box<dyn Fn() -> RoomId + Send + Sync>,
}

impl RoomRegistry {
    pub fn new(connections: Arc<Connections>, relay: Relay) -> Self {
        Self::with_id_source(connections, relay, generate_room_id)
    }

    pub fn with_id_source(
        connections: Arc<Connections>,
        relay: Relay,
        id_source: impl Fn() -> RoomId + Send + Sync + 'static,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections,
            relay,
            id_source: Box::new(id_source),
        }
    }

    /// Create a room containing only `conn` and return its identifier.
    pub fn create_room(&self, conn: &Connection) -> RoomId {
        self.leave(conn);

        let room_id = loop {
            let candidate = (self.id_source)();
            let mut rooms = self.rooms.write();
            if rooms.contains_key(&candidate) {
                debug!("Room id {} already registered, retrying", candidate);
                continue;
            }
            let room = Room::with_member(candidate.clone(), conn.id().to_string());
            rooms.insert(candidate.clone(), Arc::new(Mutex::new(room)));
            break candidate;
        };

        conn.set_room(Some(room_id.clone()));
        info!("Room created: {} by {}", room_id, conn.id());
        room_id
    }

    /// Add `conn` to an existing room and return the other members as of
    /// the moment it was added.
    pub fn join_room(
        &self,
        conn: &Connection,
        room_id: &str,
        display_name: &str,
    ) -> Result<Vec<Member>> {
        let handle = self
            .room_handle(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;

        if conn.room().as_deref() != Some(room_id) {
            // Never give up the current room for a target that is already gone
            if handle.lock().is_closed() {
                return Err(Error::RoomNotFound(room_id.to_string()));
            }
            self.leave(conn);
        }

        let mut room = handle.lock();
        if room.is_closed() {
            return Err(Error::RoomNotFound(room_id.to_string()));
        }
        conn.set_display_name(display_name);
        room.add_member(conn.id().to_string());
        conn.set_room(Some(room_id.to_string()));

        let members = room
            .members()
            .filter(|id| id.as_str() != conn.id())
            .map(|id| Member {
                id: id.clone(),
                display_name: self
                    .connections
                    .get(id)
                    .map(|c| c.display_name_or_unknown())
                    .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string()),
            })
            .collect::<Vec<_>>();

        let joined = ServerMessage::UserJoined {
            id: conn.id().to_string(),
            display_name: conn.display_name_or_unknown(),
        };
        self.relay.broadcast_to_room(&room, conn.id(), &joined, true);

        info!(
            "User {} ({}) joined room {} with {} other member(s)",
            conn.display_name_or_unknown(),
            conn.id(),
            room_id,
            members.len()
        );
        Ok(members)
    }

    /// Remove `conn` from its room, destroying the room if it is now empty.
    /// A no-op for connections that are not in a room.
    pub fn leave(&self, conn: &Connection) {
        let Some(room_id) = conn.take_room() else {
            return;
        };
        let Some(handle) = self.room_handle(&room_id) else {
            return;
        };

        let emptied = {
            let mut room = handle.lock();
            if !room.remove_member(conn.id()) {
                return;
            }
            if room.is_empty() {
                room.close();
                true
            } else {
                let left = ServerMessage::UserLeft {
                    id: conn.id().to_string(),
                    display_name: conn.display_name_or_unknown(),
                };
                self.relay.broadcast_to_room(&room, conn.id(), &left, true);
                false
            }
        };

        if emptied {
            let mut rooms = self.rooms.write();
            if rooms
                .get(&room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                rooms.remove(&room_id);
            }
            info!("Room {} removed, last member {} left", room_id, conn.id());
        } else {
            info!("User {} left room {}", conn.id(), room_id);
        }
    }

    /// Deliver `msg` to the members of `room_id`.
    pub fn broadcast(
        &self,
        room_id: &str,
        sender: &str,
        msg: &ServerMessage,
        exclude_self: bool,
    ) -> Result<usize> {
        let handle = self
            .room_handle(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;
        let room = handle.lock();
        if room.is_closed() {
            return Err(Error::RoomNotFound(room_id.to_string()));
        }
        Ok(self.relay.broadcast_to_room(&room, sender, msg, exclude_self))
    }

    pub fn members(&self, room_id: &str) -> Option<Vec<String>> {
        let handle = self.room_handle(room_id)?;
        let room = handle.lock();
        (!room.is_closed()).then(|| room.members().cloned().collect())
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.members(room_id).is_some()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    fn room_handle(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().get(room_id).cloned()
    }
}
