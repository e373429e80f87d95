//! Prometheus-based monitoring for the scheduling core.
//!
//! Initialize once at startup, then record through `MetricsCollector` and
//! scrape via `export_metrics`:
//!
//! ```ignore
//! use ai_dispatch::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_request("completed", 2.5);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

// Re-export metric statics for direct access when needed
pub use prometheus::{
    ACTIVE_WORKERS, PROCESSING_DURATION, PROVIDER_REQUESTS_TOTAL, QUEUE_DEPTH, REGISTRY,
    REQUESTS_TOTAL, WORKER_COUNT,
};
