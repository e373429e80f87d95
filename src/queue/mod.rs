//! Priority queue subsystem.
//!
//! This module provides the ordered multi-level queue the scheduling core
//! synchronizes on:
//!
//! - **PriorityQueue**: three-level FIFO with strict priority dequeue
//! - **QueueManager**: connection lifetime, stale-request reaping, retry
//!   re-admission
//! - **QueueBackend**: the storage protocol (Redis in production, in-memory
//!   for tests)
//!
//! # Architecture
//!
//! ```text
//!    Producer ──► PriorityQueue ──► Worker Pool
//!                      ▲
//!                      │ reap / re-admit
//!                QueueManager
//! ```

pub mod backend;
pub mod item;
pub mod manager;
pub mod priority_queue;
pub mod redis;

// Re-export main types for convenience
pub use backend::{MemoryBackend, QueueBackend};
pub use item::{Priority, QueueItem};
pub use manager::{DropHook, ManagerHealth, QueueManager, QueueManagerConfig};
pub use priority_queue::{PriorityQueue, QueueError, QueueEvent, QueueMetrics};
pub use redis::RedisBackend;
