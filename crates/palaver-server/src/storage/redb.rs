//! Redb-backed durable message store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Message history survives server restarts.

use std::{path::Path, sync::Arc};

use palaver_core::{Message, MessageId, RoomName};
use redb::{Database, ReadableTable, TableDefinition};

use super::{MessageStore, StoreError};

/// Table: messages
/// Key: (room name length: u16 BE, room name bytes, sequence: u64 BE)
/// Value: CBOR-encoded Message
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: message_index
/// Key: message id (UTF-8 bytes)
/// Value: the message's key in the MESSAGES table
const MESSAGE_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("message_index");

/// Durable message store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (MESSAGES, MESSAGE_INDEX).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(MESSAGE_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Next sequence number for a room (one past the highest stored).
    fn compute_next_seq<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        prefix: &[u8],
    ) -> Result<u64, StoreError> {
        let start_key = message_key(prefix, 0);
        let end_key = message_key(prefix, u64::MAX);

        let mut results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;

        // Keys sort by sequence, so the highest is the last key in range.
        match results.next_back() {
            Some(result) => {
                let (key, _) = result.map_err(|e| StoreError::Io(e.to_string()))?;
                Ok(decode_seq(key.value()) + 1)
            },
            None => Ok(0),
        }
    }
}

impl MessageStore for RedbStore {
    fn append(&self, message: &Message) -> Result<(), StoreError> {
        let prefix = room_prefix(&message.room)?;

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        {
            let mut messages =
                txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut index =
                txn.open_table(MESSAGE_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;

            let seq = Self::compute_next_seq(&messages, &prefix)?;
            let key = message_key(&prefix, seq);

            let mut bytes = Vec::new();
            ciborium::into_writer(message, &mut bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            messages
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
            index
                .insert(message.id.as_str().as_bytes(), key.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn load_page(
        &self,
        room: &RoomName,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Message>, StoreError> {
        let prefix = room_prefix(room)?;

        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

        let start_key = message_key(&prefix, 0);
        let end_key = message_key(&prefix, u64::MAX);

        let results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut messages = Vec::with_capacity(limit);
        let mut skipped = 0u64;

        for result in results {
            if messages.len() >= limit {
                break;
            }

            let (_, value) = result.map_err(|e| StoreError::Io(e.to_string()))?;

            if skipped < offset {
                skipped += 1;
                continue;
            }

            let message: Message = ciborium::from_reader(value.value())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            messages.push(message);
        }

        Ok(messages)
    }

    fn message_count(&self, room: &RoomName) -> Result<u64, StoreError> {
        let prefix = room_prefix(room)?;

        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

        let start_key = message_key(&prefix, 0);
        let end_key = message_key(&prefix, u64::MAX);

        let results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut count = 0u64;
        for result in results {
            result.map_err(|e| StoreError::Io(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }

    fn find(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;

        let index = txn.open_table(MESSAGE_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;
        let Some(key) =
            index.get(id.as_str().as_bytes()).map_err(|e| StoreError::Io(e.to_string()))?
        else {
            return Ok(None);
        };
        let key = key.value().to_vec();

        let messages = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
        match messages.get(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(value) => {
                let message: Message = ciborium::from_reader(value.value())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(message))
            },
            None => Ok(None),
        }
    }

    fn delete(&self, id: &MessageId) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let removed = {
            let mut index =
                txn.open_table(MESSAGE_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut messages =
                txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

            match index
                .remove(id.as_str().as_bytes())
                .map_err(|e| StoreError::Io(e.to_string()))?
            {
                Some(key) => {
                    let key = key.value().to_vec();
                    messages
                        .remove(key.as_slice())
                        .map_err(|e| StoreError::Io(e.to_string()))?
                        .is_some()
                },
                None => false,
            }
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(removed)
    }

    fn clear_room(&self, room: &RoomName) -> Result<u64, StoreError> {
        let prefix = room_prefix(room)?;

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let deleted = {
            let mut messages =
                txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut index =
                txn.open_table(MESSAGE_INDEX).map_err(|e| StoreError::Io(e.to_string()))?;

            let start_key = message_key(&prefix, 0);
            let end_key = message_key(&prefix, u64::MAX);

            // Collect keys and ids first; removal invalidates the range.
            let mut doomed: Vec<(Vec<u8>, String)> = Vec::new();
            {
                let results = messages
                    .range(start_key.as_slice()..=end_key.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;

                for result in results {
                    let (key, value) = result.map_err(|e| StoreError::Io(e.to_string()))?;
                    let message: Message = ciborium::from_reader(value.value())
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    doomed.push((key.value().to_vec(), message.id.as_str().to_string()));
                }
            }

            for (key, id) in &doomed {
                messages.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
                index.remove(id.as_bytes()).map_err(|e| StoreError::Io(e.to_string()))?;
            }

            doomed.len() as u64
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(deleted)
    }
}

/// Encode a room name as a length-prefixed key prefix.
///
/// Layout: [name length: 2 bytes BE][name bytes]. The length prefix keeps
/// "geral" and "geral2" from sharing a key range.
fn room_prefix(room: &RoomName) -> Result<Vec<u8>, StoreError> {
    let name = room.as_str().as_bytes();
    let len = u16::try_from(name.len())
        .map_err(|_| StoreError::Serialization("room name too long".to_string()))?;

    let mut prefix = Vec::with_capacity(2 + name.len());
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(name);
    Ok(prefix)
}

/// Append a big-endian sequence number to a room prefix.
///
/// Lexicographic ordering of the result matches numeric sequence ordering.
fn message_key(prefix: &[u8], seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode the sequence number from the tail of a message key.
#[allow(clippy::expect_used)]
fn decode_seq(key: &[u8]) -> u64 {
    debug_assert!(key.len() >= 8);
    let tail = &key[key.len() - 8..];
    u64::from_be_bytes(tail.try_into().expect("invariant: message keys end in 8 sequence bytes"))
}
