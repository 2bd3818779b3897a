use crate::protocol::{ConnectionId, RoomId};
use std::collections::HashSet;

/// Membership of one room. Always accessed under the room's own lock.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
    closed: bool,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashSet::new(),
            closed: false,
        }
    }

    pub fn with_member(id: RoomId, member: ConnectionId) -> Self {
        let mut room = Self::new(id);
        room.add_member(member);
        room
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns false if the connection was already a member.
    pub fn add_member(&mut self, member: ConnectionId) -> bool {
        self.members.insert(member)
    }

    pub fn remove_member(&mut self, member: &str) -> bool {
        self.members.remove(member)
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A closed room is about to be unlinked from the registry and must not
    /// accept new members.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }
}
