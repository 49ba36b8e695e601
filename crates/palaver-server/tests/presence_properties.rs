//! Property-based tests for the presence registry.
//!
//! These verify the snapshot ordering and dedup invariants for arbitrary
//! register/unregister sequences.

use std::collections::{HashMap, HashSet};

use palaver_core::Identity;
use palaver_proto::payloads::presence::Role;
use palaver_server::PresenceRegistry;
use proptest::prelude::*;

fn identity_strategy() -> impl Strategy<Value = Identity> {
    (1u64..50, "[a-zA-Z]{1,8}", any::<bool>(), any::<bool>()).prop_map(
        |(user_id, username, admin, muted)| Identity {
            user_id,
            username,
            avatar_url: None,
            role: if admin { Role::Admin } else { Role::User },
            muted,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: snapshot contains each user id at most once, regardless of
    /// how many connections that user holds.
    #[test]
    fn prop_snapshot_dedups_by_user(identities in prop::collection::vec(identity_strategy(), 0..30)) {
        let mut registry = PresenceRegistry::new();
        for (connection_id, identity) in identities.iter().enumerate() {
            registry.register(connection_id as u64, identity.clone());
        }

        let snapshot = registry.snapshot();
        let user_ids: HashSet<u64> = snapshot.iter().map(|entry| entry.user_id).collect();
        prop_assert_eq!(user_ids.len(), snapshot.len());

        // Every registered user appears
        let registered: HashSet<u64> = identities.iter().map(|identity| identity.user_id).collect();
        prop_assert_eq!(user_ids, registered);
    }

    /// Property: admins precede regular users; within each class the order
    /// is case-insensitive by username with user id as tiebreak.
    #[test]
    fn prop_snapshot_ordering(identities in prop::collection::vec(identity_strategy(), 0..30)) {
        let mut registry = PresenceRegistry::new();
        for (connection_id, identity) in identities.iter().enumerate() {
            registry.register(connection_id as u64, identity.clone());
        }

        let snapshot = registry.snapshot();
        for pair in snapshot.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let key_a = (a.role != Role::Admin, a.username.to_lowercase(), a.user_id);
            let key_b = (b.role != Role::Admin, b.username.to_lowercase(), b.user_id);
            prop_assert!(key_a <= key_b, "snapshot out of order: {key_a:?} > {key_b:?}");
        }
    }

    /// Property: unregistering every connection empties the registry.
    #[test]
    fn prop_register_unregister_roundtrip(identities in prop::collection::vec(identity_strategy(), 0..30)) {
        let mut registry = PresenceRegistry::new();
        for (connection_id, identity) in identities.iter().enumerate() {
            registry.register(connection_id as u64, identity.clone());
        }

        for connection_id in 0..identities.len() {
            let removed = registry.unregister(connection_id as u64);
            prop_assert!(removed.is_some());
        }

        prop_assert_eq!(registry.connection_count(), 0);
        prop_assert!(registry.snapshot().is_empty());
    }

    /// Property: muting a user flips every binding of that user and no one
    /// else's.
    #[test]
    fn prop_set_muted_hits_all_bindings(
        identities in prop::collection::vec(identity_strategy(), 1..30),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut registry = PresenceRegistry::new();
        // Muted values each user was registered with (bindings may disagree)
        let mut registered: HashMap<u64, HashSet<bool>> = HashMap::new();
        for (connection_id, identity) in identities.iter().enumerate() {
            registry.register(connection_id as u64, identity.clone());
            registered.entry(identity.user_id).or_default().insert(identity.muted);
        }

        let target = identities[pick.index(identities.len())].user_id;
        registry.set_muted(target, true);

        for entry in registry.snapshot() {
            if entry.user_id == target {
                // Every binding of the target was flipped
                prop_assert!(entry.muted);
            } else {
                // Untouched users keep a muted value they were registered with
                prop_assert!(registered[&entry.user_id].contains(&entry.muted));
            }
        }
    }
}
