//! Storage error type.

use thiserror::Error;

/// Errors from message store backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// I/O or backend failure. May be transient (disk full) or permanent
    /// (corruption).
    #[error("storage io error: {0}")]
    Io(String),

    /// Encoding or decoding a stored message failed. Indicates a bug or a
    /// corrupted database.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}
