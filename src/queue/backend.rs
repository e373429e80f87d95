//! Queue storage protocol.
//!
//! The priority queue only needs ordered per-key sequences with append-right,
//! pop-left, peek-head and length operations. Anything providing those four
//! can back the queue: Redis in production, an in-process store for tests
//! and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::priority_queue::QueueError;

/// Ordered per-key sequence storage backing the priority queue.
///
/// Implementations must preserve insertion order per key: values appended
/// with [`QueueBackend::append`] come back from [`QueueBackend::take_front`]
/// in FIFO order.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Appends a value to the right of the sequence at `key`.
    async fn append(&self, key: &str, value: String) -> Result<(), QueueError>;

    /// Removes and returns the leftmost value at `key`, if any.
    async fn take_front(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Returns the leftmost value at `key` without removing it.
    async fn peek_front(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Returns the number of values at `key`.
    async fn length(&self, key: &str) -> Result<usize, QueueError>;
}

/// In-process backend for tests and single-node development.
///
/// Not durable: contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sequences: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn append(&self, key: &str, value: String) -> Result<(), QueueError> {
        let mut sequences = self.sequences.lock().expect("lock poisoned");
        sequences.entry(key.to_string()).or_default().push_back(value);
        Ok(())
    }

    async fn take_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut sequences = self.sequences.lock().expect("lock poisoned");
        Ok(sequences.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        let sequences = self.sequences.lock().expect("lock poisoned");
        Ok(sequences.get(key).and_then(|s| s.front().cloned()))
    }

    async fn length(&self, key: &str) -> Result<usize, QueueError> {
        let sequences = self.sequences.lock().expect("lock poisoned");
        Ok(sequences.get(key).map_or(0, VecDeque::len))
    }
}
