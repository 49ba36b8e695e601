//! Session management payload types.
//!
//! These payloads establish and tear down the chat session: the client
//! introduces itself with `Identify`, the server acknowledges with
//! `IdentifyAck`, and either side can end the session with `Goodbye`.

use serde::{Deserialize, Serialize};

use super::presence::{PresenceEntry, Role};

/// Client self-identification, sent as the first frame on a connection.
///
/// The profile fields are client-reported and treated as display hints only:
/// when an `auth_token` is present the directory resolves the authoritative
/// identity. Without a token the reported role and muted flags are ignored
/// outright; privilege only ever comes from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Stable user identifier. Zero is invalid.
    pub user_id: u64,

    /// Display name. Must be non-blank.
    pub username: String,

    /// Optional avatar image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    /// Client-reported role. Display hint only; never grants privilege.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Client-reported muted flag. Display hint only; the directory is
    /// authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,

    /// Opaque authentication token for directory verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Server acknowledgment of a successful `Identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyAck {
    /// Server-assigned connection identifier.
    pub connection_id: u64,

    /// The identity the server registered, after directory resolution.
    pub identity: PresenceEntry,
}

/// Graceful disconnect notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason for the disconnect.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_round_trip() {
        let original = Identify {
            user_id: 42,
            username: "alice".to_string(),
            avatar_url: Some("https://cdn.example/alice.png".to_string()),
            role: Some(Role::User),
            muted: Some(false),
            auth_token: Some("tok-123".to_string()),
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&original, &mut encoded).unwrap();
        let decoded: Identify = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn identify_optional_fields_omitted() {
        let minimal = Identify {
            user_id: 1,
            username: "bob".to_string(),
            avatar_url: None,
            role: None,
            muted: None,
            auth_token: None,
        };

        let mut full = Vec::new();
        ciborium::ser::into_writer(
            &Identify { auth_token: Some("t".to_string()), ..minimal.clone() },
            &mut full,
        )
        .unwrap();

        let mut sparse = Vec::new();
        ciborium::ser::into_writer(&minimal, &mut sparse).unwrap();

        // skip_serializing_if keeps the sparse encoding strictly smaller
        assert!(sparse.len() < full.len());
    }
}
