//! Identity directory: the authoritative source for roles and mute flags.
//!
//! Presence caches a copy of each identity for display, but every privilege
//! decision re-reads the directory, so a role change takes effect on the
//! next moderation attempt without a reconnect.
//!
//! The trait is synchronous like the storage trait; production adapters
//! (an external account service, say) would front it with their own cache.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use palaver_core::Identity;
use thiserror::Error;

/// Directory operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Auth token is unknown or expired.
    #[error("invalid token")]
    InvalidToken,

    /// No user with this id.
    #[error("user not found: {0}")]
    UserNotFound(u64),

    /// Backend failure (network, disk, ...).
    #[error("directory io error: {0}")]
    Io(String),
}

/// Authoritative identity lookups.
///
/// Must be Clone + Send + Sync; implementations share state via Arc.
pub trait Directory: Clone + Send + Sync + 'static {
    /// Resolve an auth token to an identity.
    ///
    /// # Errors
    ///
    /// `DirectoryError::InvalidToken` if the token is unknown.
    fn authenticate(&self, token: &str) -> Result<Identity, DirectoryError>;

    /// Look up a user by id. `None` if unknown.
    ///
    /// # Errors
    ///
    /// `DirectoryError::Io` on backend failure.
    fn lookup(&self, user_id: u64) -> Result<Option<Identity>, DirectoryError>;

    /// Insert or replace a user record.
    ///
    /// Called for tokenless identifies so moderation can later act on the
    /// user.
    ///
    /// # Errors
    ///
    /// `DirectoryError::Io` on backend failure.
    fn upsert(&self, identity: &Identity) -> Result<(), DirectoryError>;

    /// Persist a user's muted flag.
    ///
    /// # Errors
    ///
    /// `DirectoryError::UserNotFound` if the user is unknown.
    fn set_muted(&self, user_id: u64, muted: bool) -> Result<(), DirectoryError>;
}

/// In-memory directory for tests and single-process deployments.
///
/// Thread-safe through Mutex, but uses `lock().expect()` which will panic if
/// the mutex is poisoned - acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<MemoryDirectoryInner>>,
}

#[derive(Default)]
struct MemoryDirectoryInner {
    users: HashMap<u64, Identity>,
    tokens: HashMap<String, u64>,
}

impl MemoryDirectory {
    /// Create a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    pub fn insert_user(&self, identity: Identity) {
        self.inner.lock().expect("Mutex poisoned").users.insert(identity.user_id, identity);
    }

    /// Associate a token with a seeded user.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    pub fn insert_token(&self, token: impl Into<String>, user_id: u64) {
        self.inner.lock().expect("Mutex poisoned").tokens.insert(token.into(), user_id);
    }

    /// Number of known users.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").users.len()
    }
}

impl Directory for MemoryDirectory {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn authenticate(&self, token: &str) -> Result<Identity, DirectoryError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let user_id = inner.tokens.get(token).ok_or(DirectoryError::InvalidToken)?;
        inner.users.get(user_id).cloned().ok_or(DirectoryError::InvalidToken)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn lookup(&self, user_id: u64) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.inner.lock().expect("Mutex poisoned").users.get(&user_id).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn upsert(&self, identity: &Identity) -> Result<(), DirectoryError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .users
            .insert(identity.user_id, identity.clone());
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn set_muted(&self, user_id: u64, muted: bool) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let identity =
            inner.users.get_mut(&user_id).ok_or(DirectoryError::UserNotFound(user_id))?;
        identity.muted = muted;
        Ok(())
    }
}
