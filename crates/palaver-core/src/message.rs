//! Message and room domain types.
//!
//! These are the stored forms: validated room names, server-assigned message
//! identifiers, and the full message record that the store persists as CBOR.
//! The wire forms live in `palaver_proto::payloads::chat`; conversions are
//! lossless in both directions.

use palaver_proto::payloads::chat::{MessageBody, SenderInfo, WireMessage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Room name validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid room name: {0}")]
pub struct InvalidRoomName(pub String);

/// A validated room name.
///
/// Non-blank after trimming; stored and compared verbatim (room names are
/// case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validate and wrap a room name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoomName` if the name is blank after trimming.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidRoomName> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidRoomName(name));
        }
        Ok(Self(name))
    }

    /// The room name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomName {
    type Error = InvalidRoomName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier.
///
/// Format: `<sender_id>-<unix_millis>-<suffix:08x>`. The random suffix keeps
/// ids unique when one sender publishes twice in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Build a fresh id from its components.
    #[must_use]
    pub fn new(sender_id: u64, unix_millis: u64, suffix: u32) -> Self {
        Self(format!("{sender_id}-{unix_millis}-{suffix:08x}"))
    }

    /// Wrap an id received off the wire or read from storage.
    #[must_use]
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored chat message.
///
/// The sender profile is snapshotted at send time: later username or avatar
/// changes do not rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,

    /// Room the message belongs to.
    pub room: RoomName,

    /// Sender profile at send time.
    pub sender: SenderInfo,

    /// Message content.
    pub body: MessageBody,

    /// Server-assigned creation timestamp, Unix milliseconds.
    pub created_at_ms: u64,
}

impl Message {
    /// Convert to the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            id: self.id.as_str().to_string(),
            room: self.room.as_str().to_string(),
            sender: self.sender.clone(),
            body: self.body.clone(),
            created_at_ms: self.created_at_ms,
        }
    }

    /// Build from the wire representation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoomName` if the wire room name is blank.
    pub fn from_wire(wire: WireMessage) -> Result<Self, InvalidRoomName> {
        Ok(Self {
            id: MessageId::from_string(wire.id),
            room: RoomName::new(wire.room)?,
            sender: wire.sender,
            body: wire.body,
            created_at_ms: wire.created_at_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_rejects_blank() {
        assert!(RoomName::new("").is_err());
        assert!(RoomName::new("   ").is_err());
        assert!(RoomName::new("\t\n").is_err());
        assert!(RoomName::new("geral").is_ok());
        assert!(RoomName::new("room with spaces").is_ok());
    }

    #[test]
    fn room_name_is_case_sensitive() {
        let a = RoomName::new("Geral").unwrap();
        let b = RoomName::new("geral").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn message_id_format() {
        let id = MessageId::new(42, 1_700_000_000_000, 0xABCD);
        assert_eq!(id.as_str(), "42-1700000000000-0000abcd");
    }

    #[test]
    fn message_wire_round_trip() {
        let message = Message {
            id: MessageId::new(7, 1_700_000_000_000, 1),
            room: RoomName::new("geral").unwrap(),
            sender: SenderInfo { user_id: 7, username: "alice".to_string(), avatar_url: None },
            body: MessageBody::Text("oi".to_string()),
            created_at_ms: 1_700_000_000_000,
        };

        let wire = message.to_wire();
        let back = Message::from_wire(wire).unwrap();
        assert_eq!(message, back);
    }

    #[test]
    fn message_cbor_round_trip() {
        let message = Message {
            id: MessageId::new(7, 1, 2),
            room: RoomName::new("memes").unwrap(),
            sender: SenderInfo {
                user_id: 7,
                username: "bob".to_string(),
                avatar_url: Some("https://cdn.example/b.png".to_string()),
            },
            body: MessageBody::Image { url: "mem://media/3".to_string() },
            created_at_ms: 99,
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&message, &mut encoded).unwrap();
        let decoded: Message = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(message, decoded);
    }

    #[test]
    fn blank_room_rejected_from_wire() {
        let wire = WireMessage {
            id: "1-2-00000003".to_string(),
            room: "  ".to_string(),
            sender: SenderInfo { user_id: 1, username: "x".to_string(), avatar_url: None },
            body: MessageBody::Text("hi".to_string()),
            created_at_ms: 2,
        };

        assert!(Message::from_wire(wire).is_err());
    }
}
