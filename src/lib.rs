//! AI request scheduling core.
//!
//! This library accepts AI requests, orders them in a three-level priority
//! queue, and drives them to completion through an elastic pool of workers
//! calling pluggable provider backends. A queue manager reaps stale
//! in-flight items and re-admits retries in the background.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod worker;

// Re-export the main surface types
pub use config::{ConfigError, CoreConfig};
pub use error::ProviderError;
pub use processor::{CancelOutcome, ProcessorError, RequestProcessor, RequestStatus};
pub use provider::{AiProvider, AiRequest, AiResponse, ProviderManager, ProviderRegistry};
pub use queue::{Priority, PriorityQueue, QueueError, QueueItem, QueueManager};
pub use worker::{PoolError, Worker, WorkerPool, WorkerPoolConfig};
