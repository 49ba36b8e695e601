//! Chaotic store wrapper for fault injection testing.
//!
//! Store wrapper that randomly fails operations to test error handling and
//! the persist-then-broadcast contract: a failed append must produce a
//! rejection and no broadcast.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use palaver_core::{Message, MessageId, RoomName};

use super::{MessageStore, StoreError};

/// Store wrapper that randomly injects failures.
///
/// Delegates to an underlying store but fails operations based on a
/// configured failure rate. Uses Arc<Mutex<>> for the RNG state, making it
/// Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStore<S: MessageStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operation counter
    operation_count: Arc<Mutex<usize>>,
}

/// Simple deterministic RNG for chaos injection.
///
/// Linear congruential generator: fast and reproducible with the same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: MessageStore> ChaoticStore<S> {
    /// Create a new chaotic store wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn increment_operation_count(&self) {
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
    }

    #[allow(clippy::expect_used)]
    fn should_fail(&self) -> bool {
        self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate)
    }
}

impl<S: MessageStore> MessageStore for ChaoticStore<S> {
    fn append(&self, message: &Message) -> Result<(), StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.append(message)
    }

    fn load_page(
        &self,
        room: &RoomName,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<Message>, StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.load_page(room, limit, offset)
    }

    fn message_count(&self, room: &RoomName) -> Result<u64, StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.message_count(room)
    }

    fn find(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.find(id)
    }

    fn delete(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.delete(id)
    }

    fn clear_room(&self, room: &RoomName) -> Result<u64, StoreError> {
        self.increment_operation_count();
        if self.should_fail() {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        self.inner.clear_room(room)
    }
}
