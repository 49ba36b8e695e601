//! User identity domain type.

use palaver_proto::payloads::presence::{PresenceEntry, Role};
use serde::{Deserialize, Serialize};

/// A resolved user identity as tracked by the presence registry.
///
/// Identities are keyed by `user_id`; everything else is display state that
/// a re-register may overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier. Zero is invalid.
    pub user_id: u64,

    /// Display name. Non-blank by construction (enforced at identify time).
    pub username: String,

    /// Optional avatar image URL.
    pub avatar_url: Option<String>,

    /// Privilege level.
    pub role: Role,

    /// Whether the user is currently muted.
    pub muted: bool,
}

impl Identity {
    /// True for admin identities.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Identity> for PresenceEntry {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            username: identity.username,
            avatar_url: identity.avatar_url,
            role: identity.role,
            muted: identity.muted,
        }
    }
}

impl From<PresenceEntry> for Identity {
    fn from(entry: PresenceEntry) -> Self {
        Self {
            user_id: entry.user_id,
            username: entry.username,
            avatar_url: entry.avatar_url,
            role: entry.role,
            muted: entry.muted,
        }
    }
}
