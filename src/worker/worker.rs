//! Single-slot request worker.
//!
//! A worker processes one queue item at a time: it validates the payload,
//! reports the lifecycle transition, races the provider dispatch against
//! its processing timeout and accounts the outcome in its own counters.
//! Workers never dequeue; the pool hands them items, which keeps ordering
//! concerns in one place.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::processor::request_processor::RequestProcessor;
use crate::processor::store::RequestStatus;
use crate::provider::types::{AiRequest, AiResponse};
use crate::queue::item::QueueItem;

/// Failure ratio at which a worker reports itself unhealthy.
const UNHEALTHY_FAILURE_RATIO: f64 = 0.5;

/// How long a worker's `stop` polls for an in-flight request to finish.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on one request's processing time.
    pub processing_timeout: Duration,
    /// Retry budget carried on queue items this worker fails.
    pub max_retries: u32,
    /// How often the owning pool checks this worker's health.
    pub health_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(30),
            max_retries: 3,
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Sets the processing timeout.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the health check interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Not accepting work.
    Stopped,
    /// Idle, ready for an item.
    Running,
    /// One request in flight.
    Processing,
    /// Taken out of rotation.
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Processing => write!(f, "processing"),
            WorkerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of processing one queue item.
///
/// Workers never throw out of `process_request`; every failure mode lands
/// here with its message.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    /// Whether the item completed successfully.
    pub success: bool,
    /// The provider response on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AiResponse>,
    /// The failure message otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    fn completed(response: AiResponse, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            processing_time_ms,
        }
    }

    fn failed(error: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
            processing_time_ms,
        }
    }
}

/// Health snapshot of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    /// Worker identifier.
    pub worker_id: String,
    /// Current lifecycle state.
    pub status: WorkerStatus,
    /// False once failures reach half of all outcomes, or on `Failed`.
    pub is_healthy: bool,
    /// Last time the worker did anything.
    pub last_activity: DateTime<Utc>,
    /// Successfully processed requests.
    pub processed_requests: u64,
    /// Failed requests.
    pub failed_requests: u64,
    /// Mean processing time of successful requests in milliseconds.
    pub average_processing_time_ms: u64,
    /// Milliseconds since the last `start`.
    pub uptime_ms: u64,
}

/// Processes queue items one at a time against the request processor.
pub struct Worker {
    id: String,
    processor: Arc<RequestProcessor>,
    config: WorkerConfig,
    status: RwLock<WorkerStatus>,
    stop_requested: AtomicBool,
    current_request: RwLock<Option<String>>,
    last_activity: RwLock<DateTime<Utc>>,
    started_at: RwLock<Option<Instant>>,
    processed_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_processing_time_ms: AtomicU64,
}

impl Worker {
    /// Creates a stopped worker.
    pub fn new(id: impl Into<String>, processor: Arc<RequestProcessor>, config: WorkerConfig) -> Self {
        Self {
            id: id.into(),
            processor,
            config,
            status: RwLock::new(WorkerStatus::Stopped),
            stop_requested: AtomicBool::new(false),
            current_request: RwLock::new(None),
            last_activity: RwLock::new(Utc::now()),
            started_at: RwLock::new(None),
            processed_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_processing_time_ms: AtomicU64::new(0),
        }
    }

    /// Worker identifier.
    pub fn get_id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn get_status(&self) -> WorkerStatus {
        *self.status.read().expect("lock poisoned")
    }

    /// Whether the worker has been started and not stopped.
    pub fn is_running(&self) -> bool {
        matches!(
            self.get_status(),
            WorkerStatus::Running | WorkerStatus::Processing
        )
    }

    /// Makes the worker ready for items. Idempotent.
    pub fn start(&self) {
        let mut status = self.status.write().expect("lock poisoned");
        if matches!(*status, WorkerStatus::Running | WorkerStatus::Processing) {
            return;
        }
        *status = WorkerStatus::Running;
        self.stop_requested.store(false, Ordering::SeqCst);
        *self.started_at.write().expect("lock poisoned") = Some(Instant::now());
        self.touch();
        info!(worker_id = %self.id, "Worker started");
    }

    /// Takes the worker out of rotation, letting an in-flight request
    /// finish first. Idempotent.
    pub async fn stop(&self) {
        {
            let mut status = self.status.write().expect("lock poisoned");
            match *status {
                WorkerStatus::Stopped => return,
                WorkerStatus::Processing => {
                    self.stop_requested.store(true, Ordering::SeqCst);
                }
                _ => {
                    *status = WorkerStatus::Stopped;
                    info!(worker_id = %self.id, "Worker stopped");
                    return;
                }
            }
        }

        while self.get_status() == WorkerStatus::Processing {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        *self.status.write().expect("lock poisoned") = WorkerStatus::Stopped;
        self.stop_requested.store(false, Ordering::SeqCst);
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes one queue item end to end.
    ///
    /// Refuses items when not running or when the payload is not a request
    /// object. Otherwise: report `Processing`, race the dispatch against
    /// the processing timeout, report the terminal status with timing
    /// metadata, and account exactly one outcome.
    pub async fn process_request(&self, item: QueueItem) -> ProcessingResult {
        if !self.is_running() {
            return ProcessingResult::failed("Worker is not running", 0);
        }

        if !item.data.is_object() {
            return ProcessingResult::failed("Invalid request data", 0);
        }
        let Ok(request) = serde_json::from_value::<AiRequest>(item.data.clone()) else {
            return ProcessingResult::failed("Invalid request data", 0);
        };

        if !self.begin_processing(&item.id) {
            return ProcessingResult::failed("Worker is not running", 0);
        }

        debug!(worker_id = %self.id, request_id = %item.id, "Processing request");
        self.processor
            .update_request_status(&item.id, RequestStatus::Processing, None);

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.processing_timeout, self.processor.dispatch(&request))
                .await;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(response)) => {
                self.processor.update_request_status(
                    &item.id,
                    RequestStatus::Completed,
                    Some(json!({
                        "response": response,
                        "completed_at": Utc::now(),
                        "processing_time_ms": processing_time_ms,
                    })),
                );
                self.processed_requests.fetch_add(1, Ordering::SeqCst);
                self.total_processing_time_ms
                    .fetch_add(processing_time_ms, Ordering::SeqCst);
                MetricsCollector::new()
                    .record_request("completed", processing_time_ms as f64 / 1000.0);
                info!(
                    worker_id = %self.id,
                    request_id = %item.id,
                    processing_time_ms,
                    "Request completed"
                );
                ProcessingResult::completed(response, processing_time_ms)
            }
            Ok(Err(e)) => self.record_failure(&item.id, e.to_string(), processing_time_ms),
            Err(_) => self.record_failure(
                &item.id,
                format!(
                    "Processing timeout after {}ms",
                    self.config.processing_timeout.as_millis()
                ),
                processing_time_ms,
            ),
        };

        self.finish_processing();
        result
    }

    /// Health snapshot derived from the worker's own counters.
    pub fn get_health(&self) -> WorkerHealth {
        let status = self.get_status();
        let processed = self.processed_requests.load(Ordering::SeqCst);
        let failed = self.failed_requests.load(Ordering::SeqCst);
        let total_time = self.total_processing_time_ms.load(Ordering::SeqCst);

        let failure_ratio = if processed + failed > 0 {
            failed as f64 / (processed + failed) as f64
        } else {
            0.0
        };

        let uptime_ms = self
            .started_at
            .read()
            .expect("lock poisoned")
            .map_or(0, |t| t.elapsed().as_millis() as u64);

        WorkerHealth {
            worker_id: self.id.clone(),
            status,
            is_healthy: status != WorkerStatus::Failed && failure_ratio < UNHEALTHY_FAILURE_RATIO,
            last_activity: *self.last_activity.read().expect("lock poisoned"),
            processed_requests: processed,
            failed_requests: failed,
            average_processing_time_ms: if processed > 0 { total_time / processed } else { 0 },
            uptime_ms,
        }
    }

    /// Request id currently in flight, if any.
    pub fn current_request(&self) -> Option<String> {
        self.current_request.read().expect("lock poisoned").clone()
    }

    /// Atomically claims the worker's single processing slot.
    fn begin_processing(&self, request_id: &str) -> bool {
        let mut status = self.status.write().expect("lock poisoned");
        if *status != WorkerStatus::Running {
            return false;
        }
        *status = WorkerStatus::Processing;
        *self.current_request.write().expect("lock poisoned") = Some(request_id.to_string());
        self.touch();
        true
    }

    /// Releases the processing slot, honoring a stop requested mid-flight.
    fn finish_processing(&self) {
        let mut status = self.status.write().expect("lock poisoned");
        if *status == WorkerStatus::Processing {
            *status = if self.stop_requested.load(Ordering::SeqCst) {
                WorkerStatus::Stopped
            } else {
                WorkerStatus::Running
            };
        }
        *self.current_request.write().expect("lock poisoned") = None;
        self.touch();
    }

    fn record_failure(
        &self,
        request_id: &str,
        error: String,
        processing_time_ms: u64,
    ) -> ProcessingResult {
        warn!(
            worker_id = %self.id,
            request_id = %request_id,
            error = %error,
            "Request failed"
        );
        self.processor.update_request_status(
            request_id,
            RequestStatus::Failed,
            Some(json!({
                "error": error,
                "failed_at": Utc::now(),
                "processing_time_ms": processing_time_ms,
            })),
        );
        self.failed_requests.fetch_add(1, Ordering::SeqCst);
        MetricsCollector::new().record_request("failed", processing_time_ms as f64 / 1000.0);
        ProcessingResult::failed(error, processing_time_ms)
    }

    fn touch(&self) {
        *self.last_activity.write().expect("lock poisoned") = Utc::now();
    }
}
