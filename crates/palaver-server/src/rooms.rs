//! Room membership: which connections receive a room's broadcasts.
//!
//! Bidirectional maps (connection → room, room → connections) give O(1)
//! lookups both ways. A connection is in at most one room at a time: joining
//! a new room implicitly leaves the previous one. Rooms exist implicitly -
//! any validated name is a room, and an empty room simply drops out of the
//! map.

use std::collections::{HashMap, HashSet};

use palaver_core::RoomName;

/// Result of a join operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection entered the room, leaving `previous` if it was
    /// somewhere else.
    Joined {
        /// Room the connection was in before, if any.
        previous: Option<RoomName>,
    },

    /// The connection was already in this exact room. No state change.
    AlreadyMember,
}

/// Tracks room membership per connection.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Connection id → current room.
    conn_room: HashMap<u64, RoomName>,
    /// Room → member connection ids.
    room_members: HashMap<RoomName, HashSet<u64>>,
}

impl RoomRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a connection into a room.
    ///
    /// Enforces the single-room policy: any previous membership is removed
    /// first. Re-joining the current room is a no-op.
    pub fn join(&mut self, connection_id: u64, room: RoomName) -> JoinOutcome {
        if self.conn_room.get(&connection_id) == Some(&room) {
            return JoinOutcome::AlreadyMember;
        }

        let previous = self.leave(connection_id);

        self.room_members.entry(room.clone()).or_default().insert(connection_id);
        self.conn_room.insert(connection_id, room);

        JoinOutcome::Joined { previous }
    }

    /// Remove a connection from its current room, if any.
    ///
    /// Returns the room it left. Idempotent.
    pub fn leave(&mut self, connection_id: u64) -> Option<RoomName> {
        let room = self.conn_room.remove(&connection_id)?;

        if let Some(members) = self.room_members.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.room_members.remove(&room);
            }
        }

        Some(room)
    }

    /// Room a connection is currently in.
    #[must_use]
    pub fn room_of(&self, connection_id: u64) -> Option<&RoomName> {
        self.conn_room.get(&connection_id)
    }

    /// Member connections of a room.
    pub fn members(&self, room: &RoomName) -> impl Iterator<Item = u64> + '_ {
        self.room_members.get(room).into_iter().flat_map(|members| members.iter().copied())
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, room: &RoomName) -> usize {
        self.room_members.get(room).map_or(0, HashSet::len)
    }

    /// Number of non-empty rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.room_members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomName {
        RoomName::new(name).unwrap()
    }

    #[test]
    fn join_and_members() {
        let mut rooms = RoomRegistry::new();

        assert_eq!(rooms.join(1, room("geral")), JoinOutcome::Joined { previous: None });
        assert_eq!(rooms.join(2, room("geral")), JoinOutcome::Joined { previous: None });

        let members: HashSet<_> = rooms.members(&room("geral")).collect();
        assert_eq!(members, HashSet::from([1, 2]));
        assert_eq!(rooms.room_of(1), Some(&room("geral")));
    }

    #[test]
    fn join_enforces_single_room() {
        let mut rooms = RoomRegistry::new();

        rooms.join(1, room("geral"));
        let outcome = rooms.join(1, room("memes"));

        assert_eq!(outcome, JoinOutcome::Joined { previous: Some(room("geral")) });
        assert_eq!(rooms.member_count(&room("geral")), 0);
        assert_eq!(rooms.member_count(&room("memes")), 1);
        assert_eq!(rooms.room_of(1), Some(&room("memes")));
    }

    #[test]
    fn rejoin_same_room_is_noop() {
        let mut rooms = RoomRegistry::new();

        rooms.join(1, room("geral"));
        assert_eq!(rooms.join(1, room("geral")), JoinOutcome::AlreadyMember);
        assert_eq!(rooms.member_count(&room("geral")), 1);
    }

    #[test]
    fn leave_is_idempotent() {
        let mut rooms = RoomRegistry::new();

        rooms.join(1, room("geral"));
        assert_eq!(rooms.leave(1), Some(room("geral")));
        assert_eq!(rooms.leave(1), None);
        assert_eq!(rooms.room_of(1), None);
    }

    #[test]
    fn empty_room_is_dropped() {
        let mut rooms = RoomRegistry::new();

        rooms.join(1, room("geral"));
        rooms.leave(1);

        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn members_of_unknown_room_is_empty() {
        let rooms = RoomRegistry::new();
        assert_eq!(rooms.members(&room("nowhere")).count(), 0);
    }
}
