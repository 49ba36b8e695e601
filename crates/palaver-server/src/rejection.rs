//! Rejections: per-request failures reported back to the origin.
//!
//! A rejection never crashes the driver and never leaks to any connection
//! other than the one that triggered it. Each variant maps to a stable
//! numeric code on [`ErrorPayload`] so clients can branch without parsing
//! message strings.

use palaver_proto::payloads::ErrorPayload;
use thiserror::Error;

/// Reasons a client request is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The connection has no presence binding (no accepted Identify).
    #[error("unknown sender: connection {0}")]
    UnknownSender(u64),

    /// The sender is muted.
    #[error("user {0} is muted")]
    Muted(u64),

    /// Payload failed validation (blank room, empty body, ...).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Message or media store refused the operation. Nothing was broadcast.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The actor lacks the required privilege.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Moderation target is an admin.
    #[error("cannot moderate admin {0}")]
    TargetIsAdmin(u64),

    /// Mute target is already muted.
    #[error("user {0} is already muted")]
    AlreadyMuted(u64),

    /// Referenced user or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Identify failed validation; the connection stays open for a retry.
    #[error("malformed identify: {0}")]
    MalformedIdentify(String),
}

impl Rejection {
    /// Wire representation sent to the originating connection.
    #[must_use]
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::UnknownSender(id) => ErrorPayload::unknown_sender(*id),
            Self::Muted(id) => ErrorPayload::muted(*id),
            Self::InvalidPayload(msg) => ErrorPayload::invalid_payload(msg.clone()),
            Self::StoreUnavailable(msg) => ErrorPayload::store_unavailable(msg.clone()),
            Self::Forbidden(msg) => ErrorPayload::forbidden(msg.clone()),
            Self::TargetIsAdmin(id) => ErrorPayload::target_is_admin(*id),
            Self::AlreadyMuted(id) => ErrorPayload::already_muted(*id),
            Self::NotFound(msg) => ErrorPayload::not_found(msg.clone()),
            Self::MalformedIdentify(msg) => ErrorPayload::malformed_identify(msg.clone()),
        }
    }

    /// Numeric wire code for this rejection.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.to_error_payload().code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Rejection::UnknownSender(1).code(), ErrorPayload::UNKNOWN_SENDER);
        assert_eq!(Rejection::Muted(1).code(), ErrorPayload::MUTED);
        assert_eq!(Rejection::InvalidPayload("x".to_string()).code(), ErrorPayload::INVALID_PAYLOAD);
        assert_eq!(
            Rejection::StoreUnavailable("x".to_string()).code(),
            ErrorPayload::STORE_UNAVAILABLE
        );
        assert_eq!(Rejection::Forbidden("x".to_string()).code(), ErrorPayload::FORBIDDEN);
        assert_eq!(Rejection::TargetIsAdmin(1).code(), ErrorPayload::TARGET_IS_ADMIN);
        assert_eq!(Rejection::AlreadyMuted(1).code(), ErrorPayload::ALREADY_MUTED);
        assert_eq!(Rejection::NotFound("x".to_string()).code(), ErrorPayload::NOT_FOUND);
        assert_eq!(
            Rejection::MalformedIdentify("x".to_string()).code(),
            ErrorPayload::MALFORMED_IDENTIFY
        );
    }

    #[test]
    fn payload_carries_message() {
        let payload = Rejection::Forbidden("only admins can mute".to_string()).to_error_payload();
        assert_eq!(payload.message, "only admins can mute");
        assert_eq!(payload.retry_after, None);
    }
}
