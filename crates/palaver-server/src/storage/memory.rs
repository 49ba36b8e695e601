#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use palaver_core::{Message, MessageId, RoomName};

use super::{MessageStore, StoreError};

/// In-memory message store for testing and single-process deployments.
///
/// Uses `HashMap` for room lookup and Vec for append-ordered logs, plus an
/// id index for O(1) find. All state is wrapped in Arc<Mutex<>> to allow
/// Clone and concurrent access. Thread-safe through Mutex, but uses
/// `lock().expect()` which will panic if the mutex is poisoned - acceptable
/// for test code.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Messages per room, in append order.
    rooms: HashMap<RoomName, Vec<Message>>,

    /// Message id → owning room (for find/delete).
    by_id: HashMap<String, RoomName>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with stored messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test code.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").rooms.len()
    }

    /// Total number of messages across all rooms.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn total_message_count(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.rooms.values().map(std::vec::Vec::len).sum()
    }
}

impl MessageStore for MemoryStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        inner.by_id.insert(message.id.as_str().to_string(), message.room.clone());
        inner.rooms.entry(message.room.clone()).or_default().push(message.clone());

        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn load_page(
        &self,
        room: &RoomName,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let Some(messages) = inner.rooms.get(room) else {
            return Ok(Vec::new());
        };

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(messages.len());
        let end = start.saturating_add(limit).min(messages.len());

        Ok(messages[start..end].to_vec())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn message_count(&self, room: &RoomName) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.rooms.get(room).map_or(0, |messages| messages.len() as u64))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn find(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let Some(room) = inner.by_id.get(id.as_str()) else {
            return Ok(None);
        };

        Ok(inner
            .rooms
            .get(room)
            .and_then(|messages| messages.iter().find(|message| &message.id == id).cloned()))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn delete(&self, id: &MessageId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let Some(room) = inner.by_id.remove(id.as_str()) else {
            return Ok(false);
        };

        let mut removed = false;
        if let Some(messages) = inner.rooms.get_mut(&room) {
            let before = messages.len();
            messages.retain(|message| &message.id != id);
            removed = messages.len() != before;

            if messages.is_empty() {
                inner.rooms.remove(&room);
            }
        }

        Ok(removed)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn clear_room(&self, room: &RoomName) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let Some(messages) = inner.rooms.remove(room) else {
            return Ok(0);
        };

        for message in &messages {
            inner.by_id.remove(message.id.as_str());
        }

        Ok(messages.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use palaver_proto::payloads::chat::{MessageBody, SenderInfo};

    use super::*;

    fn room(name: &str) -> RoomName {
        RoomName::new(name).unwrap()
    }

    fn message(room_name: &str, sender: u64, seq: u32, text: &str) -> Message {
        Message {
            id: MessageId::new(sender, 1_700_000_000_000 + u64::from(seq), seq),
            room: room(room_name),
            sender: SenderInfo { user_id: sender, username: "alice".to_string(), avatar_url: None },
            body: MessageBody::Text(text.to_string()),
            created_at_ms: 1_700_000_000_000 + u64::from(seq),
        }
    }

    #[test]
    fn new_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.room_count(), 0);
        assert_eq!(store.total_message_count(), 0);
        assert_eq!(store.message_count(&room("geral")).unwrap(), 0);
    }

    #[test]
    fn append_and_load_ascending() {
        let store = MemoryStore::new();

        for seq in 0..5 {
            store.append(&message("geral", 42, seq, "oi")).expect("append failed");
        }

        let page = store.load_page(&room("geral"), 10, 0).expect("load failed");
        assert_eq!(page.len(), 5);
        for (i, stored) in page.iter().enumerate() {
            assert_eq!(stored.created_at_ms, 1_700_000_000_000 + i as u64);
        }
    }

    #[test]
    fn load_page_pagination() {
        let store = MemoryStore::new();

        for seq in 0..20 {
            store.append(&message("geral", 42, seq, "oi")).expect("append failed");
        }

        let batch1 = store.load_page(&room("geral"), 10, 0).expect("load failed");
        assert_eq!(batch1.len(), 10);
        assert_eq!(batch1[0].created_at_ms, 1_700_000_000_000);

        let batch2 = store.load_page(&room("geral"), 10, 10).expect("load failed");
        assert_eq!(batch2.len(), 10);
        assert_eq!(batch2[0].created_at_ms, 1_700_000_000_010);

        let batch3 = store.load_page(&room("geral"), 10, 20).expect("load failed");
        assert!(batch3.is_empty());
    }

    #[test]
    fn find_and_delete() {
        let store = MemoryStore::new();
        let stored = message("geral", 42, 0, "oi");

        store.append(&stored).expect("append failed");
        assert_eq!(store.find(&stored.id).expect("find failed"), Some(stored.clone()));

        assert!(store.delete(&stored.id).expect("delete failed"));
        assert_eq!(store.find(&stored.id).expect("find failed"), None);
        assert!(!store.delete(&stored.id).expect("delete failed"));
    }

    #[test]
    fn clear_room_leaves_other_rooms() {
        let store = MemoryStore::new();

        for seq in 0..3 {
            store.append(&message("geral", 42, seq, "oi")).expect("append failed");
        }
        store.append(&message("memes", 7, 100, "haha")).expect("append failed");

        assert_eq!(store.clear_room(&room("geral")).expect("clear failed"), 3);
        assert_eq!(store.message_count(&room("geral")).unwrap(), 0);
        assert_eq!(store.message_count(&room("memes")).unwrap(), 1);

        // Cleared ids are gone from the index too
        assert!(store.find(&MessageId::new(42, 1_700_000_000_000, 0)).unwrap().is_none());
    }

    #[test]
    fn clear_unknown_room_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.clear_room(&room("nowhere")).unwrap(), 0);
    }
}
