//! Server error types.
//!
//! Provides strongly-typed errors for driver operations:
//! - Connection tracking (lookup, send)
//! - Adapter access (message store, directory, media store)
//! - Frame encoding/decoding

use std::fmt;

use crate::{directory::DirectoryError, media::MediaError, storage::StoreError};

/// Errors that can occur while driving the server state machine.
#[derive(Debug)]
pub enum ServerError {
    /// Connection not found in the driver's table.
    ///
    /// Occurs when an event references a connection that was never accepted
    /// or was already closed. May be transient if the connection just
    /// disconnected.
    ConnectionNotFound(u64),

    /// Send to a connection failed.
    ///
    /// The connection may be closed or broken. Transient - the client can
    /// reconnect and retry.
    ConnectionFailed {
        /// Connection that failed
        connection_id: u64,
        /// Error message
        reason: String,
    },

    /// Message store operation failed.
    ///
    /// Wraps errors from the store backend. May be transient (I/O errors) or
    /// fatal (serialization errors). See `StoreError` for details.
    Store(StoreError),

    /// Directory operation failed.
    ///
    /// Wraps errors from the identity directory. See `DirectoryError`.
    Directory(DirectoryError),

    /// Media store operation failed.
    ///
    /// Wraps errors from the media backend. See `MediaError`.
    Media(MediaError),

    /// Frame encoding/decoding error.
    ///
    /// Invalid frame format received from a client or failed to encode a
    /// response. Fatal for that frame - indicates a protocol violation or bug.
    Protocol(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionNotFound(id) => write!(f, "connection not found: {id}"),
            Self::ConnectionFailed { connection_id, reason } => {
                write!(f, "connection failed for {connection_id}: {reason}")
            },
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Directory(err) => write!(f, "directory error: {err}"),
            Self::Media(err) => write!(f, "media error: {err}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Directory(err) => Some(err),
            Self::Media(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<DirectoryError> for ServerError {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl From<MediaError> for ServerError {
    fn from(err: MediaError) -> Self {
        Self::Media(err)
    }
}

impl From<palaver_proto::ProtocolError> for ServerError {
    fn from(err: palaver_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
