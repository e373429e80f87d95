//! Worker subsystem.
//!
//! - **Worker**: single-slot processor executing one queue item at a time
//!   with a processing timeout and owned metric counters
//! - **WorkerPool**: elastic roster of workers with queue polling, demand
//!   scaling and health supervision
//!
//! Workers never touch the queue themselves; the pool dequeues and hands
//! items over, keeping ordering decisions in one place.

pub mod pool;
pub mod worker;

// Re-export main types for convenience
pub use pool::{
    PoolError, PoolHealth, PoolPerformance, WorkerPool, WorkerPoolConfig, QUEUE_ITEMS_PER_WORKER,
};
pub use worker::{ProcessingResult, Worker, WorkerConfig, WorkerHealth, WorkerStatus};
