//! Moderation payload types.
//!
//! Admin-only requests and their broadcast announcements. Announcements go
//! to every connection, not just room members, so clients can update muted
//! badges in presence lists.

use serde::{Deserialize, Serialize};

/// Admin request to mute a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mute {
    /// User to mute.
    pub target: u64,
}

/// Admin request to unmute a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unmute {
    /// User to unmute.
    pub target: u64,
}

/// Admin request to clear a room's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearRoom {
    /// Room whose history should be deleted.
    pub room: String,
}

/// Mute announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMuted {
    /// Muted user.
    pub target: u64,

    /// Display name of the muted user.
    pub username: String,
}

/// Unmute announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUnmuted {
    /// Unmuted user.
    pub target: u64,

    /// Display name of the unmuted user.
    pub username: String,
}

/// Cleared-room announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCleared {
    /// Room whose history was deleted.
    pub room: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_round_trip() {
        let original = Mute { target: 7 };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: Mute = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn room_cleared_round_trip() {
        let original = RoomCleared { room: "geral".to_string() };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: RoomCleared = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }
}
