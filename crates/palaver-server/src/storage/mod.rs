//! Message store abstraction.
//!
//! Trait-based abstraction for persisting chat messages. The trait is
//! synchronous (no async) to maintain a clean synchronous API design; the
//! driver calls it inline during submit (persist-then-broadcast).

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::MemoryStore;
use palaver_core::{Message, MessageId, RoomName};

pub use self::redb::RedbStore;

/// Persistent, append-ordered message log per room.
///
/// Must be Clone (shared with the runtime for history queries), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
///
/// Pages are returned in ascending creation order (append order).
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Append a message to its room's log.
    ///
    /// # Errors
    ///
    /// `StoreError::Io` or `StoreError::Serialization` on backend failure.
    /// On error the caller must NOT broadcast the message.
    fn append(&self, message: &Message) -> Result<(), StoreError>;

    /// Load a page of a room's log in ascending creation order.
    ///
    /// Returns messages `[offset, offset+limit)`. Fewer than `limit` when
    /// the log ends; empty for an unknown room or an offset past the end.
    fn load_page(
        &self,
        room: &RoomName,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Message>, StoreError>;

    /// Total number of messages stored for a room.
    fn message_count(&self, room: &RoomName) -> Result<u64, StoreError>;

    /// Find a message by id. `None` if unknown.
    fn find(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// Delete a single message. Returns `true` if it existed.
    fn delete(&self, id: &MessageId) -> Result<bool, StoreError>;

    /// Delete every message in a room. Returns the number deleted.
    ///
    /// Other rooms are untouched.
    fn clear_room(&self, room: &RoomName) -> Result<u64, StoreError>;
}
