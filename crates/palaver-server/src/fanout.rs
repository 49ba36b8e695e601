//! Message submit pipeline support: body validation and submit dedup.
//!
//! The dedup cache answers redelivered submits (client retries after a
//! flaky ack) with the originally assigned message instead of persisting
//! and broadcasting a duplicate. It is process-local and bounded; a cache
//! miss on a true duplicate is acceptable, a duplicate broadcast within the
//! window is not.

use std::collections::{HashMap, VecDeque};

use palaver_core::Message;
use palaver_proto::payloads::chat::MessageBody;

use crate::rejection::Rejection;

/// Default capacity of the recent-submit cache.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Validate a message body before it is assigned an id.
///
/// Text must be non-empty after trimming; image references must be
/// non-blank URLs.
///
/// # Errors
///
/// Returns `Rejection::InvalidPayload` describing the failed check.
pub fn validate_body(body: &MessageBody) -> Result<(), Rejection> {
    match body {
        MessageBody::Text(text) if text.trim().is_empty() => {
            Err(Rejection::InvalidPayload("empty message text".to_string()))
        },
        MessageBody::Image { url } if url.trim().is_empty() => {
            Err(Rejection::InvalidPayload("blank media reference".to_string()))
        },
        MessageBody::Text(_) | MessageBody::Image { .. } => Ok(()),
    }
}

/// Bounded recent-submit cache keyed by `(sender user id, request nonce)`.
///
/// Oldest-first eviction once full. Nonce 0 means "no dedup requested" and
/// is never cached.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    entries: HashMap<(u64, u32), Message>,
    order: VecDeque<(u64, u32)>,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: HashMap::new(), order: VecDeque::new() }
    }

    /// Look up a prior submit for this sender and nonce.
    #[must_use]
    pub fn get(&self, sender: u64, nonce: u32) -> Option<&Message> {
        if nonce == 0 {
            return None;
        }
        self.entries.get(&(sender, nonce))
    }

    /// Record an accepted submit. Evicts the oldest entry when full.
    ///
    /// Nonce 0 is never recorded.
    pub fn record(&mut self, sender: u64, nonce: u32, message: Message) {
        if nonce == 0 || self.capacity == 0 {
            return;
        }

        let key = (sender, nonce);
        if self.entries.insert(key, message).is_none() {
            self.order.push_back(key);
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Number of cached submits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no submits are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use palaver_core::{MessageId, RoomName};
    use palaver_proto::payloads::chat::SenderInfo;

    use super::*;

    fn message(sender: u64, text: &str) -> Message {
        Message {
            id: MessageId::new(sender, 1_700_000_000_000, 1),
            room: RoomName::new("geral").unwrap(),
            sender: SenderInfo { user_id: sender, username: "alice".to_string(), avatar_url: None },
            body: MessageBody::Text(text.to_string()),
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn validate_body_rules() {
        assert!(validate_body(&MessageBody::Text("oi".to_string())).is_ok());
        assert!(validate_body(&MessageBody::Text("   ".to_string())).is_err());
        assert!(validate_body(&MessageBody::Text(String::new())).is_err());
        assert!(validate_body(&MessageBody::Image { url: "mem://media/0".to_string() }).is_ok());
        assert!(validate_body(&MessageBody::Image { url: " ".to_string() }).is_err());
    }

    #[test]
    fn cache_hit_returns_original() {
        let mut cache = DedupCache::new(10);
        let original = message(42, "first");

        cache.record(42, 7, original.clone());

        assert_eq!(cache.get(42, 7), Some(&original));
        assert_eq!(cache.get(42, 8), None);
        assert_eq!(cache.get(43, 7), None);
    }

    #[test]
    fn nonce_zero_is_exempt() {
        let mut cache = DedupCache::new(10);

        cache.record(42, 0, message(42, "first"));

        assert!(cache.is_empty());
        assert_eq!(cache.get(42, 0), None);
    }

    #[test]
    fn eviction_is_oldest_first() {
        let mut cache = DedupCache::new(3);

        for nonce in 1..=4 {
            cache.record(42, nonce, message(42, "m"));
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(42, 1), None);
        assert!(cache.get(42, 2).is_some());
        assert!(cache.get(42, 4).is_some());
    }

    #[test]
    fn re_record_same_key_does_not_grow_order() {
        let mut cache = DedupCache::new(2);

        cache.record(42, 1, message(42, "a"));
        cache.record(42, 1, message(42, "b"));
        cache.record(42, 2, message(42, "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(42, 1).is_some());
        assert!(cache.get(42, 2).is_some());
    }
}
