//! High-level metric recording helpers.
//!
//! `MetricsCollector` wraps the raw Prometheus statics and provides
//! convenient methods for the health sampling loop and the dispatch path.
//! All methods are no-ops until `init_metrics()` has run.

use super::prometheus::{
    ACTIVE_WORKERS, PROCESSING_DURATION, PROVIDER_REQUESTS_TOTAL, QUEUE_DEPTH, REQUESTS_TOTAL,
    WORKER_COUNT,
};
use crate::queue::priority_queue::QueueMetrics;
use crate::worker::pool::PoolHealth;

/// Metrics collector for recording scheduling core operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new collector.
    ///
    /// Note: metrics must be initialized with `init_metrics()` before
    /// recording has any effect.
    pub fn new() -> Self {
        Self
    }

    /// Record a queue depth snapshot.
    pub fn observe_queue(&self, metrics: &QueueMetrics) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&["high"]).set(metrics.high as f64);
            gauge
                .with_label_values(&["normal"])
                .set(metrics.normal as f64);
            gauge.with_label_values(&["low"]).set(metrics.low as f64);
        }
    }

    /// Record a pool health snapshot.
    pub fn observe_pool(&self, health: &PoolHealth) {
        if let Some(gauge) = WORKER_COUNT.get() {
            gauge.set(health.worker_count as f64);
        }
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(health.active_workers as f64);
        }
        self.observe_queue(&health.queue_metrics);
    }

    /// Record a request reaching a terminal state.
    ///
    /// # Arguments
    ///
    /// * `outcome` - Terminal outcome ("completed", "failed", "cancelled")
    /// * `duration_secs` - Processing duration in seconds
    pub fn record_request(&self, outcome: &str, duration_secs: f64) {
        if let Some(counter) = REQUESTS_TOTAL.get() {
            counter.with_label_values(&[outcome]).inc();
        }
        if let Some(histogram) = PROCESSING_DURATION.get() {
            histogram.observe(duration_secs);
        }
    }

    /// Record one provider dispatch.
    pub fn record_provider_request(&self, provider: &str, success: bool) {
        if let Some(counter) = PROVIDER_REQUESTS_TOTAL.get() {
            let status = if success { "ok" } else { "error" };
            counter.with_label_values(&[provider, status]).inc();
        }
    }
}
