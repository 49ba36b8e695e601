//! Room and presence payload types.

use serde::{Deserialize, Serialize};

/// Privilege level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Regular participant.
    User,
    /// Moderator with mute/unmute/clear privileges.
    Admin,
}

/// Request to join a room.
///
/// A connection belongs to at most one room; joining a new room implicitly
/// leaves the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Room name. Must be non-blank.
    pub room: String,
}

/// One entry in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Stable user identifier.
    pub user_id: u64,

    /// Display name.
    pub username: String,

    /// Optional avatar image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Privilege level.
    pub role: Role,

    /// Whether the user is currently muted.
    pub muted: bool,
}

/// Ordered snapshot of all online users.
///
/// Entries are deduplicated by user id and ordered admins-first, then by
/// case-insensitive username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Online users in display order.
    pub entries: Vec<PresenceEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let original = PresenceSnapshot {
            entries: vec![PresenceEntry {
                user_id: 9,
                username: "mod".to_string(),
                avatar_url: None,
                role: Role::Admin,
                muted: false,
            }],
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: PresenceSnapshot = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn empty_snapshot_serde() {
        let empty = PresenceSnapshot { entries: vec![] };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&empty, &mut encoded).unwrap();
        let decoded: PresenceSnapshot = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert!(decoded.entries.is_empty());
    }
}
