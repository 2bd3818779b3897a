//! Stateless routing of signaling envelopes.

use super::connection::{Connection, Connections};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ConnectionId, ServerMessage};
use crate::room::Room;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Relay {
    connections: Arc<Connections>,
}

impl Relay {
    pub fn new(connections: Arc<Connections>) -> Self {
        Self { connections }
    }

    /// Forward an offer, answer or candidate to the connection named in `to`,
    /// stamped with the sender's identity.
    pub fn relay_direct(&self, from: &Connection, msg: ClientMessage) -> Result<()> {
        let (to, envelope) = stamp(from, msg)?;
        let target = self
            .connections
            .get(&to)
            .ok_or_else(|| Error::StaleTarget(to.clone()))?;
        debug!("Relaying {} from {} to {}", envelope.name(), from.id(), to);
        target.send(envelope)
    }

    /// Deliver `msg` to every member of `room`, optionally skipping the
    /// sender. Returns how many members it reached.
    pub fn broadcast_to_room(
        &self,
        room: &Room,
        sender: &str,
        msg: &ServerMessage,
        exclude_self: bool,
    ) -> usize {
        let mut delivered = 0;
        for member in room.members() {
            if exclude_self && member == sender {
                continue;
            }
            let sent = self
                .connections
                .get(member)
                .ok_or_else(|| Error::StaleTarget(member.clone()))
                .and_then(|conn| conn.send(msg.clone()));
            match sent {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Dropping {} for room {}: {}", msg.name(), room.id(), e),
            }
        }
        delivered
    }
}

fn stamp(from: &Connection, msg: ClientMessage) -> Result<(ConnectionId, ServerMessage)> {
    let from_id = from.id().to_string();
    match msg {
        ClientMessage::Offer { sdp, to } => Ok((
            to,
            ServerMessage::Offer {
                sdp,
                from: from_id,
                display_name: from.display_name_or_unknown(),
            },
        )),
        ClientMessage::Answer { sdp, to } => Ok((to, ServerMessage::Answer { sdp, from: from_id })),
        ClientMessage::IceCandidate { candidate, to } => Ok((
            to,
            ServerMessage::IceCandidate {
                candidate,
                from: from_id,
            },
        )),
        other => Err(Error::Signaling(format!(
            "{} is not a direct envelope",
            other.name()
        ))),
    }
}
