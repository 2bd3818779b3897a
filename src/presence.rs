//! Room presence and chat, on both ends of the signaling channel.

use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, ServerMessage, UNKNOWN_DISPLAY_NAME};
use crate::room::RoomRegistry;
use crate::server::Connection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Stamp `text` with the sender's name and the current time and deliver it
/// to every member of `room_id`, the sender included.
///
/// Chat is only accepted for the room the sender is currently in.
pub fn broadcast_chat(
    registry: &RoomRegistry,
    sender: &Connection,
    room_id: &str,
    text: String,
) -> Result<()> {
    if sender.room().as_deref() != Some(room_id) {
        warn!(
            "Chat from {} for room {} it is not a member of",
            sender.id(),
            room_id
        );
        return Err(Error::Signaling(format!(
            "{} is not a member of room {}",
            sender.id(),
            room_id
        )));
    }

    let msg = ServerMessage::ChatMessage {
        display_name: sender.display_name_or_unknown(),
        text,
        timestamp: Utc::now(),
        sender_id: sender.id().to_string(),
    };
    let delivered = registry.broadcast(room_id, sender.id(), &msg, false)?;
    debug!("Chat from {} delivered to {} members", sender.id(), delivered);
    Ok(())
}

/// A chat line as the local participant sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub display_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: ConnectionId,
    /// Sent by the local participant.
    pub own: bool,
}

impl ChatEntry {
    pub fn new(
        display_name: String,
        text: String,
        timestamp: DateTime<Utc>,
        sender_id: ConnectionId,
        local_id: Option<&str>,
    ) -> Self {
        let own = local_id == Some(sender_id.as_str());
        Self {
            display_name,
            text,
            timestamp,
            sender_id,
            own,
        }
    }
}

/// Who else is in the room, keyed by connection id.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    names: HashMap<ConnectionId, String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ConnectionId>, display_name: impl Into<String>) {
        self.names.insert(id.into(), display_name.into());
    }

    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.names.remove(id)
    }

    pub fn name_of(&self, id: &str) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}
