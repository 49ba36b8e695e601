//! Chat message payload types.
//!
//! These payloads carry user-visible traffic: publishing, fan-out events,
//! history pagination, deletion, and media uploads.

use serde::{Deserialize, Serialize};

/// Message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text message.
    Text(String),
    /// Image hosted out-of-band.
    Image {
        /// Public URL of the stored image.
        url: String,
    },
}

/// Sender profile embedded in a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Stable user identifier.
    pub user_id: u64,

    /// Display name at send time.
    pub username: String,

    /// Optional avatar image URL at send time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A stored message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned message identifier.
    pub id: String,

    /// Room the message belongs to.
    pub room: String,

    /// Sender profile, snapshotted at send time.
    pub sender: SenderInfo,

    /// Message content.
    pub body: MessageBody,

    /// Server-assigned creation timestamp, Unix milliseconds.
    pub created_at_ms: u64,
}

/// Client request to publish a message.
///
/// The submit nonce travels in the frame header's `request_id` field and
/// drives duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publish {
    /// Target room.
    pub room: String,

    /// Message content.
    pub body: MessageBody,
}

/// A stored message fanned out to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// The stored message.
    pub message: WireMessage,
}

/// Request for a page of room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Room to page through.
    pub room: String,

    /// Page size. Defaults to 50, clamped to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Number of messages to skip from the start of history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// A page of room history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Room the page belongs to.
    pub room: String,

    /// Messages in ascending creation order.
    pub messages: Vec<WireMessage>,

    /// True if more messages exist past this page.
    pub has_more: bool,
}

/// Request to delete a single message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    /// Identifier of the message to delete.
    pub message_id: String,
}

/// Deleted-message announcement to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeleted {
    /// Identifier of the deleted message.
    pub message_id: String,

    /// Room the message belonged to.
    pub room: String,
}

/// Media bytes uploaded for out-of-band hosting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUpload {
    /// MIME content type of the upload.
    pub content_type: String,

    /// Raw media bytes.
    pub bytes: Vec<u8>,
}

/// Public URL of stored media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStored {
    /// URL the media is reachable at.
    pub url: String,
}
