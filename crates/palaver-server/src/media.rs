//! Media store: opaque byte blobs in, public URLs out.
//!
//! Chat messages never embed image bytes; the client uploads first, gets a
//! URL back, and publishes an image message referencing it.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Media store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Upload carried zero bytes.
    #[error("empty upload")]
    Empty,

    /// Content type is not accepted.
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    /// Backend failure.
    #[error("media io error: {0}")]
    Io(String),
}

/// Stores uploaded media and hands back a publicly usable URL.
pub trait MediaStore: Clone + Send + Sync + 'static {
    /// Store a blob, returning its public URL.
    ///
    /// # Errors
    ///
    /// - `MediaError::Empty` for zero-byte uploads
    /// - `MediaError::UnsupportedType` for non-image content types
    fn store(&self, content_type: &str, bytes: &[u8]) -> Result<String, MediaError>;
}

/// In-memory media store for tests and single-process deployments.
///
/// URLs use the `mem://media/<n>` scheme; `n` is the insertion index.
/// Thread-safe through Mutex, but uses `lock().expect()` which will panic if
/// the mutex is poisoned - acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryMediaStore {
    inner: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryMediaStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").len()
    }

    /// Fetch a stored object by index (for tests).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<(String, Vec<u8>)> {
        self.inner.lock().expect("Mutex poisoned").get(index).cloned()
    }
}

impl MediaStore for MemoryMediaStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn store(&self, content_type: &str, bytes: &[u8]) -> Result<String, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        if !content_type.starts_with("image/") {
            return Err(MediaError::UnsupportedType(content_type.to_string()));
        }

        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let index = inner.len();
        inner.push((content_type.to_string(), bytes.to_vec()));

        Ok(format!("mem://media/{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_returns_sequential_urls() {
        let store = MemoryMediaStore::new();

        assert_eq!(store.store("image/png", b"aaaa").unwrap(), "mem://media/0");
        assert_eq!(store.store("image/jpeg", b"bbbb").unwrap(), "mem://media/1");
        assert_eq!(store.object_count(), 2);
    }

    #[test]
    fn stored_bytes_round_trip() {
        let store = MemoryMediaStore::new();
        store.store("image/png", b"payload").unwrap();

        let (content_type, bytes) = store.get(0).unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn empty_upload_rejected() {
        let store = MemoryMediaStore::new();
        assert_eq!(store.store("image/png", b""), Err(MediaError::Empty));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn non_image_rejected() {
        let store = MemoryMediaStore::new();
        let result = store.store("application/zip", b"zzzz");
        assert_eq!(result, Err(MediaError::UnsupportedType("application/zip".to_string())));
    }
}
