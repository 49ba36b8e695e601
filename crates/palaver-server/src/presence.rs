//! Presence registry: who is online, per live connection.
//!
//! Presence is keyed by connection id, not user id: one user with three tabs
//! open holds three bindings. The snapshot dedups by user id so clients see
//! each person once, regardless of connection count. Presence is ephemeral
//! and never persisted; a restart starts from an empty registry.

use std::collections::HashMap;

use palaver_core::Identity;
use palaver_proto::payloads::presence::PresenceEntry;

/// Registry of live connections and their resolved identities.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Connection id → resolved identity.
    bindings: HashMap<u64, Identity>,
}

impl PresenceRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to an identity, overwriting any prior binding.
    ///
    /// Re-identify is an overwrite, not an error.
    pub fn register(&mut self, connection_id: u64, identity: Identity) {
        self.bindings.insert(connection_id, identity);
    }

    /// Remove a connection's binding. Idempotent.
    pub fn unregister(&mut self, connection_id: u64) -> Option<Identity> {
        self.bindings.remove(&connection_id)
    }

    /// Identity bound to a connection. `None` before Identify.
    #[must_use]
    pub fn get(&self, connection_id: u64) -> Option<&Identity> {
        self.bindings.get(&connection_id)
    }

    /// Update the muted flag on every binding sharing this user id.
    ///
    /// Returns the number of connections updated.
    pub fn set_muted(&mut self, user_id: u64, muted: bool) -> usize {
        let mut updated = 0;
        for identity in self.bindings.values_mut() {
            if identity.user_id == user_id {
                identity.muted = muted;
                updated += 1;
            }
        }
        updated
    }

    /// Ordered, deduplicated presence snapshot.
    ///
    /// One entry per user id; admins first, then users, each group ordered
    /// by case-insensitive username (user id as tiebreak for identical
    /// names).
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut by_user: HashMap<u64, &Identity> = HashMap::new();
        for identity in self.bindings.values() {
            by_user.entry(identity.user_id).or_insert(identity);
        }

        let mut entries: Vec<PresenceEntry> =
            by_user.into_values().map(|identity| identity.clone().into()).collect();

        entries.sort_by(|a, b| {
            let a_admin = a.role == palaver_proto::payloads::presence::Role::Admin;
            let b_admin = b.role == palaver_proto::payloads::presence::Role::Admin;
            b_admin
                .cmp(&a_admin)
                .then_with(|| a.username.to_lowercase().cmp(&b.username.to_lowercase()))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        entries
    }

    /// Number of live bindings (connections, not distinct users).
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.bindings.len()
    }
}
