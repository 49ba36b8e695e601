//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary for performance, but payloads use CBOR for
//! type safety and forward compatibility. The `Payload` enum covers all
//! message types: session management (Identify, Ping, etc.), room and
//! presence traffic, chat messages, and moderation.
//!
//! CBOR is self-describing (field names embedded), compact, and needs no
//! code generation. Optional fields can be added to any payload without
//! breaking older peers.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod chat;
pub mod moderation;
pub mod presence;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header,
/// so we serialize only the inner struct content (no variant tag in CBOR).
///
/// # Invariants
///
/// - Opcode Uniqueness: Each payload variant corresponds to exactly one
///   `Opcode`. The `opcode()` method returns a unique opcode for each variant.
///
/// - Serialization Consistency: Encoding a `Payload` and then decoding it with
///   the same opcode MUST produce an equivalent value. This is verified by
///   round-trip tests.
///
/// # Security
///
/// - No Variant Tag: Unlike typical Rust enum serialization, we do NOT
///   serialize the variant discriminator. The frame header's `opcode` field
///   already identifies the payload type. This prevents attackers from sending
///   mismatched opcode/payload pairs.
///
/// - Exhaustive Matching: All methods use exhaustive `match` statements. Adding
///   a new variant will cause compile errors in `encode()`, `decode()`, and
///   `opcode()`, ensuring no variant is accidentally left unhandled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session Management
    /// Client introduces itself
    Identify(session::Identify),
    /// Server response to Identify
    IdentifyAck(session::IdentifyAck),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Ping for keepalive
    Ping,
    /// Pong response
    Pong,

    // Rooms and Presence
    /// Join (or switch to) a room
    JoinRoom(presence::JoinRoom),
    /// Request the current presence snapshot
    PresenceRequest,
    /// Ordered presence snapshot push
    PresenceSnapshot(presence::PresenceSnapshot),

    // Chat
    /// Publish a message to a room
    Publish(chat::Publish),
    /// Stored message fanned out to room members
    MessageEvent(chat::MessageEvent),
    /// Request a page of room history
    HistoryRequest(chat::HistoryRequest),
    /// Page of room history
    HistoryResponse(chat::HistoryResponse),
    /// Request deletion of a single message
    DeleteMessage(chat::DeleteMessage),
    /// Deleted-message announcement
    MessageDeleted(chat::MessageDeleted),
    /// Upload media bytes for out-of-band hosting
    MediaUpload(chat::MediaUpload),
    /// Public URL of stored media
    MediaStored(chat::MediaStored),

    // Moderation
    /// Mute a user
    Mute(moderation::Mute),
    /// Unmute a user
    Unmute(moderation::Unmute),
    /// Clear a room's history
    ClearRoom(moderation::ClearRoom),
    /// Mute announcement
    UserMuted(moderation::UserMuted),
    /// Unmute announcement
    UserUnmuted(moderation::UserUnmuted),
    /// Cleared-room announcement
    RoomCleared(moderation::RoomCleared),

    // Error frame
    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Sender is not registered in presence.
    pub const UNKNOWN_SENDER: u16 = 0x0001;
    /// Sender is muted.
    pub const MUTED: u16 = 0x0002;
    /// Payload failed validation.
    pub const INVALID_PAYLOAD: u16 = 0x0003;
    /// Message store rejected the operation.
    pub const STORE_UNAVAILABLE: u16 = 0x0004;
    /// Caller lacks the required privilege.
    pub const FORBIDDEN: u16 = 0x0005;
    /// Moderation target is an admin.
    pub const TARGET_IS_ADMIN: u16 = 0x0006;
    /// Moderation target is already muted.
    pub const ALREADY_MUTED: u16 = 0x0007;
    /// Referenced entity does not exist.
    pub const NOT_FOUND: u16 = 0x0008;
    /// Identify frame failed validation.
    pub const MALFORMED_IDENTIFY: u16 = 0x0009;

    /// Create an unknown sender error.
    pub fn unknown_sender(user_id: u64) -> Self {
        Self {
            code: Self::UNKNOWN_SENDER,
            message: format!("unknown sender: {user_id}"),
            retry_after: None,
        }
    }

    /// Create a muted sender error.
    pub fn muted(user_id: u64) -> Self {
        Self { code: Self::MUTED, message: format!("user {user_id} is muted"), retry_after: None }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into(), retry_after: None }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self { code: Self::STORE_UNAVAILABLE, message: msg.into(), retry_after: None }
    }

    /// Create a forbidden error.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self { code: Self::FORBIDDEN, message: msg.into(), retry_after: None }
    }

    /// Create a target-is-admin error.
    pub fn target_is_admin(user_id: u64) -> Self {
        Self {
            code: Self::TARGET_IS_ADMIN,
            message: format!("cannot moderate admin {user_id}"),
            retry_after: None,
        }
    }

    /// Create an already-muted error.
    pub fn already_muted(user_id: u64) -> Self {
        Self {
            code: Self::ALREADY_MUTED,
            message: format!("user {user_id} is already muted"),
            retry_after: None,
        }
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { code: Self::NOT_FOUND, message: msg.into(), retry_after: None }
    }

    /// Create a malformed identify error.
    pub fn malformed_identify(msg: impl Into<String>) -> Self {
        Self { code: Self::MALFORMED_IDENTIFY, message: msg.into(), retry_after: None }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Identify(_) => Opcode::Identify,
            Self::IdentifyAck(_) => Opcode::IdentifyAck,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::JoinRoom(_) => Opcode::JoinRoom,
            Self::PresenceRequest => Opcode::PresenceRequest,
            Self::PresenceSnapshot(_) => Opcode::PresenceSnapshot,
            Self::Publish(_) => Opcode::Publish,
            Self::MessageEvent(_) => Opcode::MessageEvent,
            Self::HistoryRequest(_) => Opcode::HistoryRequest,
            Self::HistoryResponse(_) => Opcode::HistoryResponse,
            Self::DeleteMessage(_) => Opcode::DeleteMessage,
            Self::MessageDeleted(_) => Opcode::MessageDeleted,
            Self::MediaUpload(_) => Opcode::MediaUpload,
            Self::MediaStored(_) => Opcode::MediaStored,
            Self::Mute(_) => Opcode::Mute,
            Self::Unmute(_) => Opcode::Unmute,
            Self::ClearRoom(_) => Opcode::ClearRoom,
            Self::UserMuted(_) => Opcode::UserMuted,
            Self::UserUnmuted(_) => Opcode::UserUnmuted,
            Self::RoomCleared(_) => Opcode::RoomCleared,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload to buffer (zero-allocation)
    ///
    /// Serializes only the inner struct, NOT the variant tag.
    /// The frame header's opcode already identifies the payload type.
    ///
    /// Size validation happens later in [`Frame::encode`], so payloads can
    /// be encoded for testing or inspection without artificial limits.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Identify(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::IdentifyAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            // Zero-byte payloads
            Self::Ping | Self::Pong | Self::PresenceRequest => Ok(()),
            Self::JoinRoom(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::PresenceSnapshot(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Publish(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageEvent(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HistoryRequest(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HistoryResponse(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DeleteMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageDeleted(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MediaUpload(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MediaStored(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Mute(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Unmute(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ClearRoom(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserMuted(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserUnmuted(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RoomCleared(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// The size check happens BEFORE CBOR parsing begins, so the parser
    /// never processes maliciously large inputs.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    ///   (16 MB)
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let payload = match opcode {
            Opcode::Identify => Self::Identify(de(bytes)?),
            Opcode::IdentifyAck => Self::IdentifyAck(de(bytes)?),
            Opcode::Goodbye => Self::Goodbye(de(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::JoinRoom => Self::JoinRoom(de(bytes)?),
            Opcode::PresenceRequest => Self::PresenceRequest,
            Opcode::PresenceSnapshot => Self::PresenceSnapshot(de(bytes)?),
            Opcode::Publish => Self::Publish(de(bytes)?),
            Opcode::MessageEvent => Self::MessageEvent(de(bytes)?),
            Opcode::HistoryRequest => Self::HistoryRequest(de(bytes)?),
            Opcode::HistoryResponse => Self::HistoryResponse(de(bytes)?),
            Opcode::DeleteMessage => Self::DeleteMessage(de(bytes)?),
            Opcode::MessageDeleted => Self::MessageDeleted(de(bytes)?),
            Opcode::MediaUpload => Self::MediaUpload(de(bytes)?),
            Opcode::MediaStored => Self::MediaStored(de(bytes)?),
            Opcode::Mute => Self::Mute(de(bytes)?),
            Opcode::Unmute => Self::Unmute(de(bytes)?),
            Opcode::ClearRoom => Self::ClearRoom(de(bytes)?),
            Opcode::UserMuted => Self::UserMuted(de(bytes)?),
            Opcode::UserUnmuted => Self::UserUnmuted(de(bytes)?),
            Opcode::RoomCleared => Self::RoomCleared(de(bytes)?),
            Opcode::Error => Self::Error(de(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame
    ///
    /// Encodes the payload to CBOR bytes, sets the correct opcode in the
    /// header, and creates a `Frame` with automatic `payload_size`
    /// calculation.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf.into()))
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds maximum size
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
