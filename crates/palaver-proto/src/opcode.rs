//! Frame operation codes.

/// Operation code identifying the payload type of a frame.
///
/// Grouped by concern: session management (0x000x), room and presence
/// (0x001x), chat messages and history (0x002x), moderation (0x003x), and
/// the error frame (0x00FF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client introduces itself (optionally with an auth token)
    Identify = 0x0001,
    /// Server acknowledges an Identify
    IdentifyAck = 0x0002,
    /// Graceful disconnect
    Goodbye = 0x0003,
    /// Liveness probe
    Ping = 0x0004,
    /// Liveness response
    Pong = 0x0005,

    /// Client joins (or switches to) a room
    JoinRoom = 0x0010,
    /// Client requests the current presence snapshot
    PresenceRequest = 0x0011,
    /// Server pushes the ordered presence snapshot
    PresenceSnapshot = 0x0012,

    /// Client publishes a message to a room
    Publish = 0x0020,
    /// Server fans a stored message out to room members
    MessageEvent = 0x0021,
    /// Client requests a page of room history
    HistoryRequest = 0x0022,
    /// Server responds with a page of room history
    HistoryResponse = 0x0023,
    /// Client requests deletion of a single message
    DeleteMessage = 0x0024,
    /// Server announces a deleted message to room members
    MessageDeleted = 0x0025,
    /// Client uploads media bytes for out-of-band hosting
    MediaUpload = 0x0026,
    /// Server responds with the public URL of stored media
    MediaStored = 0x0027,

    /// Admin mutes a user
    Mute = 0x0030,
    /// Admin unmutes a user
    Unmute = 0x0031,
    /// Admin clears a room's history
    ClearRoom = 0x0032,
    /// Server announces a mute to all connections
    UserMuted = 0x0033,
    /// Server announces an unmute to all connections
    UserUnmuted = 0x0034,
    /// Server announces a cleared room to all connections
    RoomCleared = 0x0035,

    /// Error response
    Error = 0x00FF,
}

impl Opcode {
    /// Convert to the wire representation.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse from the wire representation. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Identify),
            0x0002 => Some(Self::IdentifyAck),
            0x0003 => Some(Self::Goodbye),
            0x0004 => Some(Self::Ping),
            0x0005 => Some(Self::Pong),
            0x0010 => Some(Self::JoinRoom),
            0x0011 => Some(Self::PresenceRequest),
            0x0012 => Some(Self::PresenceSnapshot),
            0x0020 => Some(Self::Publish),
            0x0021 => Some(Self::MessageEvent),
            0x0022 => Some(Self::HistoryRequest),
            0x0023 => Some(Self::HistoryResponse),
            0x0024 => Some(Self::DeleteMessage),
            0x0025 => Some(Self::MessageDeleted),
            0x0026 => Some(Self::MediaUpload),
            0x0027 => Some(Self::MediaStored),
            0x0030 => Some(Self::Mute),
            0x0031 => Some(Self::Unmute),
            0x0032 => Some(Self::ClearRoom),
            0x0033 => Some(Self::UserMuted),
            0x0034 => Some(Self::UserUnmuted),
            0x0035 => Some(Self::RoomCleared),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}
