//! Prometheus metrics registration and export.
//!
//! Defines all metrics exposed by the scheduling core and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all scheduling core metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of items in the queue, labeled by priority.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of workers in the pool.
pub static WORKER_COUNT: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently processing a request.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total requests driven to a terminal state, labeled by outcome.
pub static REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Request processing duration in seconds.
pub static PROCESSING_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Total provider dispatches, labeled by provider and status.
pub static PROVIDER_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup. Recording helpers are no-ops until
/// this has run, so library consumers that skip metrics pay nothing.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically
/// due to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let queue_depth = GaugeVec::new(
        Opts::new("ai_dispatch_queue_depth", "Number of items in the queue"),
        &["priority"],
    )?;

    let worker_count = Gauge::new("ai_dispatch_worker_count", "Number of workers in the pool")?;

    let active_workers = Gauge::new(
        "ai_dispatch_active_workers",
        "Number of workers currently processing a request",
    )?;

    let requests_total = CounterVec::new(
        Opts::new(
            "ai_dispatch_requests_total",
            "Total requests driven to a terminal state",
        ),
        &["outcome"],
    )?;

    let processing_duration = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ai_dispatch_processing_duration_seconds",
            "Request processing duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )?;

    let provider_requests_total = CounterVec::new(
        Opts::new(
            "ai_dispatch_provider_requests_total",
            "Total provider dispatches",
        ),
        &["provider", "status"],
    )?;

    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(worker_count.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(processing_duration.clone()))?;
    registry.register(Box::new(provider_requests_total.clone()))?;

    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = WORKER_COUNT.set(worker_count);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = REQUESTS_TOTAL.set(requests_total);
    let _ = PROCESSING_DURATION.set(processing_duration);
    let _ = PROVIDER_REQUESTS_TOTAL.set(provider_requests_total);
    let _ = REGISTRY.set(registry);

    Ok(())
}

/// Export all registered metrics in the Prometheus text format.
///
/// Returns an empty string when metrics were never initialized.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&registry.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_export() {
        // OnceLock statics survive across tests; initialization twice must
        // not panic.
        let _ = init_metrics();
        let _ = init_metrics();

        if let Some(gauge) = WORKER_COUNT.get() {
            gauge.set(3.0);
        }
        if let Some(counter) = REQUESTS_TOTAL.get() {
            counter.with_label_values(&["completed"]).inc();
        }

        let exported = export_metrics();
        assert!(exported.contains("ai_dispatch_worker_count"));
        assert!(exported.contains("ai_dispatch_requests_total"));
    }
}
