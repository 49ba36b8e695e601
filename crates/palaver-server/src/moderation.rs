//! Privilege checks for moderation commands.
//!
//! Every check re-reads the directory rather than trusting cached presence,
//! so a role or mute change takes effect on the next command without a
//! reconnect.

use palaver_core::{Identity, Message};

use crate::{
    directory::{Directory, DirectoryError},
    rejection::Rejection,
};

fn directory_rejection(error: DirectoryError) -> Rejection {
    match error {
        DirectoryError::UserNotFound(id) => Rejection::NotFound(format!("user {id}")),
        DirectoryError::InvalidToken => Rejection::Forbidden("invalid token".to_string()),
        DirectoryError::Io(msg) => Rejection::StoreUnavailable(msg),
    }
}

/// Resolve an actor and confirm they hold the admin role.
///
/// # Errors
///
/// `Rejection::Forbidden` when the actor is unknown or not an admin,
/// `Rejection::StoreUnavailable` when the directory cannot answer.
pub fn require_admin<D: Directory>(directory: &D, user_id: u64) -> Result<Identity, Rejection> {
    let actor = directory
        .lookup(user_id)
        .map_err(directory_rejection)?
        .ok_or_else(|| Rejection::Forbidden(format!("unknown actor {user_id}")))?;

    if actor.is_admin() {
        Ok(actor)
    } else {
        Err(Rejection::Forbidden(format!("user {user_id} is not an admin")))
    }
}

/// Validate a mute target: must exist, must not be an admin, must not
/// already be muted.
///
/// # Errors
///
/// `Rejection::NotFound`, `Rejection::TargetIsAdmin`, or
/// `Rejection::AlreadyMuted`.
pub fn check_mute_target<D: Directory>(directory: &D, target_id: u64) -> Result<Identity, Rejection> {
    let target = directory
        .lookup(target_id)
        .map_err(directory_rejection)?
        .ok_or_else(|| Rejection::NotFound(format!("user {target_id}")))?;

    if target.is_admin() {
        return Err(Rejection::TargetIsAdmin(target_id));
    }
    if target.muted {
        return Err(Rejection::AlreadyMuted(target_id));
    }

    Ok(target)
}

/// Validate an unmute target: must exist. Unmuting an unmuted user is a
/// no-op, not an error.
///
/// # Errors
///
/// `Rejection::NotFound` when the target is unknown.
pub fn check_unmute_target<D: Directory>(
    directory: &D,
    target_id: u64,
) -> Result<Identity, Rejection> {
    directory
        .lookup(target_id)
        .map_err(directory_rejection)?
        .ok_or_else(|| Rejection::NotFound(format!("user {target_id}")))
}

/// Decide whether a requester may delete a message: the author always can,
/// admins can delete anything.
///
/// # Errors
///
/// `Rejection::Forbidden` when the requester is neither.
pub fn authorize_delete<D: Directory>(
    directory: &D,
    requester_id: u64,
    message: &Message,
) -> Result<(), Rejection> {
    if message.sender.user_id == requester_id {
        return Ok(());
    }

    let requester = directory.lookup(requester_id).map_err(directory_rejection)?;
    if requester.is_some_and(|identity| identity.is_admin()) {
        return Ok(());
    }

    Err(Rejection::Forbidden(format!(
        "user {requester_id} may not delete messages from user {}",
        message.sender.user_id
    )))
}

#[cfg(test)]
mod tests {
    use palaver_core::{MessageId, RoomName};
    use palaver_proto::payloads::{
        chat::{MessageBody, SenderInfo},
        presence::Role,
    };

    use super::*;
    use crate::directory::MemoryDirectory;

    fn seeded_directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.insert_user(Identity {
            user_id: 1,
            username: "root".to_string(),
            avatar_url: None,
            role: Role::Admin,
            muted: false,
        });
        directory.insert_user(Identity {
            user_id: 42,
            username: "alice".to_string(),
            avatar_url: None,
            role: Role::User,
            muted: false,
        });
        directory.insert_user(Identity {
            user_id: 43,
            username: "bruno".to_string(),
            avatar_url: None,
            role: Role::User,
            muted: true,
        });
        directory
    }

    fn message_from(sender: u64) -> Message {
        Message {
            id: MessageId::new(sender, 1_700_000_000_000, 1),
            room: RoomName::new("geral").unwrap(),
            sender: SenderInfo { user_id: sender, username: "alice".to_string(), avatar_url: None },
            body: MessageBody::Text("oi".to_string()),
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn require_admin_accepts_admin() {
        let directory = seeded_directory();
        assert_eq!(require_admin(&directory, 1).unwrap().username, "root");
    }

    #[test]
    fn require_admin_rejects_regular_user_and_unknown() {
        let directory = seeded_directory();
        assert!(matches!(require_admin(&directory, 42), Err(Rejection::Forbidden(_))));
        assert!(matches!(require_admin(&directory, 999), Err(Rejection::Forbidden(_))));
    }

    #[test]
    fn mute_target_checks() {
        let directory = seeded_directory();

        assert_eq!(check_mute_target(&directory, 42).unwrap().username, "alice");
        assert_eq!(check_mute_target(&directory, 1), Err(Rejection::TargetIsAdmin(1)));
        assert_eq!(check_mute_target(&directory, 43), Err(Rejection::AlreadyMuted(43)));
        assert_eq!(
            check_mute_target(&directory, 999),
            Err(Rejection::NotFound("user 999".to_string()))
        );
    }

    #[test]
    fn unmute_target_is_idempotent() {
        let directory = seeded_directory();

        // Already-unmuted target is still fine
        assert_eq!(check_unmute_target(&directory, 42).unwrap().username, "alice");
        assert_eq!(check_unmute_target(&directory, 43).unwrap().username, "bruno");
        assert!(matches!(check_unmute_target(&directory, 999), Err(Rejection::NotFound(_))));
    }

    #[test]
    fn delete_allowed_for_author_and_admin() {
        let directory = seeded_directory();
        let message = message_from(42);

        assert!(authorize_delete(&directory, 42, &message).is_ok());
        assert!(authorize_delete(&directory, 1, &message).is_ok());
        assert!(matches!(
            authorize_delete(&directory, 43, &message),
            Err(Rejection::Forbidden(_))
        ));
    }
}
