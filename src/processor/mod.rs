//! Request processing subsystem.
//!
//! The [`RequestProcessor`] is the producer-facing surface of the core:
//! request validation, id generation, the in-memory lifecycle store, queue
//! admission, provider dispatch and cancellation. The lifecycle store is
//! exclusively owned here; workers and the reaper report status changes
//! through the processor rather than touching it directly.

pub mod request_processor;
pub mod store;

// Re-export main types for convenience
pub use request_processor::{
    HealthMetrics, HealthSnapshot, ProcessorError, ProviderServiceHealth, RequestProcessor,
    ServicesHealth,
};
pub use store::{CancelOutcome, RequestRecord, RequestStatus, RequestStore};
