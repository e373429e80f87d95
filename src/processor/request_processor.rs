//! Request processor: validation, lifecycle and dispatch.
//!
//! The processor is the producer-facing surface of the scheduling core. It
//! validates incoming requests before any side effect, issues request ids,
//! owns the lifecycle store, admits work to the priority queue, and routes
//! dispatches through the provider manager. Workers report status changes
//! back through it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::metrics::MetricsCollector;
use crate::processor::store::{CancelOutcome, RequestRecord, RequestStatus, RequestStore};
use crate::provider::manager::ProviderManager;
use crate::provider::types::{AiProvider, AiRequest, AiResponse};
use crate::queue::manager::{ManagerHealth, QueueManager};
use crate::queue::priority_queue::{PriorityQueue, QueueError, QueueMetrics};
use crate::queue::Priority;

/// Length of the random suffix in generated request ids.
const ID_SUFFIX_LEN: usize = 9;

/// Characters used for request id suffixes.
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Errors surfaced by the request processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Request failed validation before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No record exists for the given request id.
    #[error("Request '{0}' not found")]
    NotFound(String),

    /// Queue admission or readout failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Provider dispatch failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Per-provider entry in the health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderServiceHealth {
    pub is_healthy: bool,
}

/// Health of the processor's collaborating services.
#[derive(Debug, Clone, Serialize)]
pub struct ServicesHealth {
    pub queue_manager: ManagerHealth,
    pub providers: BTreeMap<String, ProviderServiceHealth>,
}

/// Queue depth figures in the health snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthMetrics {
    pub queue_depth: QueueMetrics,
    pub total_depth: usize,
}

/// Composed health snapshot of the scheduling core's front half.
///
/// Remains obtainable when subsystems are degraded; degradation shows up
/// as `is_healthy: false` plus the offending service entry.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub is_running: bool,
    pub is_healthy: bool,
    pub services: ServicesHealth,
    pub metrics: HealthMetrics,
}

/// Producer-facing request lifecycle and dispatch surface.
pub struct RequestProcessor {
    queue_manager: Arc<QueueManager>,
    providers: Arc<ProviderManager>,
    store: RequestStore,
    running: AtomicBool,
}

impl RequestProcessor {
    /// Creates a processor over the given queue manager and provider
    /// router.
    pub fn new(queue_manager: Arc<QueueManager>, providers: Arc<ProviderManager>) -> Self {
        Self {
            queue_manager,
            providers,
            store: RequestStore::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Wires the queue manager's drop hook to the lifecycle store, so an
    /// item the reaper drops for good is marked failed instead of silently
    /// disappearing from the queue.
    pub fn attach_reaper_hook(self: &Arc<Self>) {
        let processor = Arc::downgrade(self);
        self.queue_manager.set_drop_hook(Arc::new(move |item| {
            if let Some(processor) = processor.upgrade() {
                processor.update_request_status(
                    &item.id,
                    RequestStatus::Failed,
                    Some(json!({
                        "error": "request dropped after exhausting retries",
                        "failed_at": Utc::now(),
                    })),
                );
            }
        }));
    }

    /// Starts the processor and the queue manager underneath it.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates the queue connection failure; the processor stays
    /// stopped.
    pub async fn start(&self) -> Result<(), ProcessorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.queue_manager.start().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        info!("Request processor started");
        Ok(())
    }

    /// Stops the processor and the queue manager underneath it.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue_manager.stop().await;
        info!("Request processor stopped");
    }

    /// Whether the processor accepts work.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The queue this processor admits work to.
    pub fn queue(&self) -> &Arc<PriorityQueue> {
        self.queue_manager.queue()
    }

    /// Validates a request, admits it to the queue and returns its id.
    ///
    /// The lifecycle record exists in `Pending` before queue admission; on
    /// admission failure the record is marked failed and the error
    /// propagates.
    ///
    /// # Errors
    ///
    /// `ProcessorError::Validation` for an empty prompt or unresolvable
    /// provider; `ProcessorError::Queue` when admission fails.
    pub async fn enqueue_request(
        &self,
        request: AiRequest,
        priority: Option<Priority>,
    ) -> Result<String, ProcessorError> {
        let provider = self.validate(&request)?;
        let request_id = generate_request_id();

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());

        self.store.create_pending(
            &request_id,
            Some(provider.name().to_string()),
            Some(model),
            Some(json!({ "original_request": request })),
        );

        let data = serde_json::to_value(&request).map_err(QueueError::Serialization)?;
        let priority = priority.unwrap_or_default();

        match self.queue().enqueue(request_id.as_str(), data, priority).await {
            Ok(()) => {
                info!(request_id = %request_id, priority = %priority, "Request admitted");
                Ok(request_id)
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Queue admission failed");
                self.store.update(
                    &request_id,
                    RequestStatus::Failed,
                    Some(json!({ "error": format!("queue admission failed: {e}") })),
                );
                Err(e.into())
            }
        }
    }

    /// Synchronous path: validates and dispatches without touching the
    /// queue or the lifecycle store.
    ///
    /// # Errors
    ///
    /// Validation and provider errors propagate so the caller can map them
    /// to transport-level failures.
    pub async fn process_request(&self, request: AiRequest) -> Result<AiResponse, ProcessorError> {
        self.validate(&request)?;
        self.dispatch(&request).await
    }

    /// Routes a request to its provider and stamps the response time.
    ///
    /// Workers call this for queued items; `process_request` calls it for
    /// the synchronous path.
    pub async fn dispatch(&self, request: &AiRequest) -> Result<AiResponse, ProcessorError> {
        let provider = self.providers.get_provider(request.provider.as_deref())?;
        let collector = MetricsCollector::new();

        let started = Instant::now();
        match provider.send_request(request).await {
            Ok(mut response) => {
                response.performance.response_time_ms = started.elapsed().as_millis() as u64;
                collector.record_provider_request(provider.name(), true);
                Ok(response)
            }
            Err(e) => {
                collector.record_provider_request(provider.name(), false);
                Err(e.into())
            }
        }
    }

    /// Snapshot of a request's lifecycle record.
    ///
    /// # Errors
    ///
    /// `ProcessorError::NotFound` for an unknown id.
    pub fn get_request_status(&self, request_id: &str) -> Result<RequestRecord, ProcessorError> {
        self.store
            .get(request_id)
            .ok_or_else(|| ProcessorError::NotFound(request_id.to_string()))
    }

    /// Upserts a request's status and merges metadata.
    pub fn update_request_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        metadata: Option<serde_json::Value>,
    ) -> RequestRecord {
        self.store.update(request_id, status, metadata)
    }

    /// Attempts to cancel a request. Never errors for well-formed input.
    pub fn cancel_request(&self, request_id: &str) -> CancelOutcome {
        self.store.cancel(request_id)
    }

    /// Number of lifecycle records currently held.
    pub fn record_count(&self) -> usize {
        self.store.len()
    }

    /// Composed health snapshot. Callable regardless of subsystem state.
    pub async fn get_health_status(&self) -> HealthSnapshot {
        let queue_manager = self.queue_manager.health().await;

        let mut providers = BTreeMap::new();
        let mut all_providers_healthy = true;
        for provider in self.providers.providers() {
            let is_healthy = provider.validate_config();
            all_providers_healthy &= is_healthy;
            providers.insert(
                provider.name().to_string(),
                ProviderServiceHealth { is_healthy },
            );
        }

        let is_running = self.is_running();
        let queue_depth = queue_manager.queue_metrics;

        HealthSnapshot {
            is_running,
            is_healthy: is_running && queue_manager.is_healthy && all_providers_healthy,
            services: ServicesHealth {
                queue_manager,
                providers,
            },
            metrics: HealthMetrics {
                queue_depth,
                total_depth: queue_depth.total_depth,
            },
        }
    }

    /// Rejects requests before any side effect and resolves the target
    /// provider. An unknown provider is a validation failure here, not a
    /// routing error at dispatch time.
    fn validate(&self, request: &AiRequest) -> Result<Arc<dyn AiProvider>, ProcessorError> {
        if request.prompt.trim().is_empty() {
            return Err(ProcessorError::Validation(
                "prompt cannot be empty".to_string(),
            ));
        }

        self.providers
            .get_provider(request.provider.as_deref())
            .map_err(|e| ProcessorError::Validation(e.to_string()))
    }
}

/// Generates an opaque, unique, monotonically trending request id:
/// a millisecond timestamp plus a random suffix.
fn generate_request_id() -> String {
    use rand::RngExt;

    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_CHARSET[rng.random_range(0..ID_CHARSET.len())] as char)
        .collect();

    format!("req-{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{ModelSpec, ResponseMetadata, TokenUsage};
    use crate::queue::backend::MemoryBackend;
    use crate::queue::manager::QueueManagerConfig;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct MockProvider {
        models: Vec<ModelSpec>,
        fail: bool,
    }

    impl MockProvider {
        fn arc(fail: bool) -> Arc<dyn AiProvider> {
            Arc::new(Self {
                models: vec![ModelSpec::new("mock-1", 100_000, 50_000)],
                fail,
            })
        }
    }

    #[async_trait]
    impl AiProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn models(&self) -> &[ModelSpec] {
            &self.models
        }

        fn default_model(&self) -> &str {
            "mock-1"
        }

        async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::Api {
                    code: 400,
                    message: "mock backend failure".to_string(),
                });
            }
            Ok(
                AiResponse::new("resp-1", "mock", "mock-1", format!("echo: {}", request.prompt))
                    .with_metadata(ResponseMetadata {
                        stop_reason: Some("end_turn".to_string()),
                        token_usage: Some(TokenUsage::new(10, 5)),
                        provider_id: Some("resp-1".to_string()),
                    }),
            )
        }

        fn validate_config(&self) -> bool {
            true
        }
    }

    fn build_processor(fail: bool) -> Arc<RequestProcessor> {
        let queue = Arc::new(PriorityQueue::with_backend(
            Arc::new(MemoryBackend::new()),
            "proc-test",
        ));
        let manager = Arc::new(QueueManager::new(queue, QueueManagerConfig::default()));

        let mut providers = ProviderManager::new();
        providers.register(MockProvider::arc(fail)).unwrap();
        providers.set_default("mock").unwrap();

        Arc::new(RequestProcessor::new(manager, Arc::new(providers)))
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_without_side_effects() {
        let processor = build_processor(false);
        processor.queue().connect().await.unwrap();

        let err = processor
            .enqueue_request(AiRequest::new(""), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Validation(_)));
        assert!(err.to_string().contains("prompt cannot be empty"));
        assert_eq!(processor.record_count(), 0);
        assert_eq!(processor.queue().total_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_a_validation_error() {
        let processor = build_processor(false);
        processor.queue().connect().await.unwrap();

        let err = processor
            .enqueue_request(AiRequest::new("hi").with_provider("ghost"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Validation(_)));
        assert_eq!(processor.record_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_record_and_admits_item() {
        let processor = build_processor(false);
        processor.queue().connect().await.unwrap();

        let id = processor
            .enqueue_request(AiRequest::new("do the thing"), Some(Priority::High))
            .await
            .unwrap();

        let record = processor.get_request_status(&id).unwrap();
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.provider.as_deref(), Some("mock"));
        assert_eq!(record.model.as_deref(), Some("mock-1"));
        let original = &record.metadata.unwrap()["original_request"];
        assert_eq!(original["prompt"], "do the thing");

        let item = processor.queue().dequeue().await.unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.priority, Priority::High);
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_record_failed() {
        let processor = build_processor(false);
        // Queue deliberately left disconnected.

        let err = processor
            .enqueue_request(AiRequest::new("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Queue(_)));

        // The record exists and reflects the failed admission.
        assert_eq!(processor.record_count(), 1);
    }

    #[tokio::test]
    async fn test_process_request_bypasses_queue() {
        let processor = build_processor(false);

        let response = processor
            .process_request(AiRequest::new("sync path"))
            .await
            .unwrap();

        assert_eq!(response.content, "echo: sync path");
        assert_eq!(response.provider, "mock");
        assert_eq!(processor.record_count(), 0);
    }

    #[tokio::test]
    async fn test_process_request_propagates_provider_errors() {
        let processor = build_processor(true);

        let err = processor
            .process_request(AiRequest::new("will fail"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Provider(_)));
        assert!(err.to_string().contains("mock backend failure"));
    }

    #[tokio::test]
    async fn test_cancellation_semantics() {
        let processor = build_processor(false);
        processor.queue().connect().await.unwrap();

        let id = processor
            .enqueue_request(AiRequest::new("cancel me"), None)
            .await
            .unwrap();

        let outcome = processor.cancel_request(&id);
        assert!(outcome.success);
        assert_eq!(outcome.status, Some(RequestStatus::Cancelled));

        // Force into processing and try again.
        processor.update_request_status(&id, RequestStatus::Processing, None);
        let outcome = processor.cancel_request(&id);
        assert!(!outcome.success);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Request is currently being processed and cannot be cancelled")
        );

        let outcome = processor.cancel_request("req-unknown");
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_get_request_status_unknown_id() {
        let processor = build_processor(false);
        let err = processor.get_request_status("req-ghost").unwrap_err();
        assert!(matches!(err, ProcessorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reaper_hook_marks_dropped_items_failed() {
        use std::time::Duration;

        let queue = Arc::new(PriorityQueue::with_backend(
            Arc::new(MemoryBackend::new()),
            "hook-test",
        ));
        let manager = Arc::new(QueueManager::new(
            queue,
            QueueManagerConfig::default()
                .with_stale_request_timeout(Duration::from_millis(1))
                .with_max_retries(0),
        ));

        let mut providers = ProviderManager::new();
        providers.register(MockProvider::arc(false)).unwrap();
        providers.set_default("mock").unwrap();

        let processor = Arc::new(RequestProcessor::new(
            Arc::clone(&manager),
            Arc::new(providers),
        ));
        processor.attach_reaper_hook();
        processor.queue().connect().await.unwrap();

        let id = processor
            .enqueue_request(AiRequest::new("doomed"), None)
            .await
            .unwrap();

        // Age past the staleness bound; zero retries means the reaper
        // drops the item on first observation.
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.reap_once().await.unwrap();

        let record = processor.get_request_status(&id).unwrap();
        assert_eq!(record.status, RequestStatus::Failed);
        assert_eq!(processor.queue().total_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_snapshot_composition() {
        let processor = build_processor(false);

        let health = processor.get_health_status().await;
        assert!(!health.is_running);
        assert!(!health.is_healthy);
        assert!(health.services.providers["mock"].is_healthy);

        processor.start().await.unwrap();

        let health = processor.get_health_status().await;
        assert!(health.is_running);
        assert!(health.is_healthy);
        assert!(health.services.queue_manager.redis_connected);
        assert_eq!(health.metrics.total_depth, 0);

        processor.stop().await;
        let health = processor.get_health_status().await;
        assert!(!health.is_running);
        assert!(!health.is_healthy);
    }

    #[test]
    fn test_request_ids_are_unique_and_shaped() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_request_id();
            assert!(id.starts_with("req-"));
            let parts: Vec<&str> = id.splitn(3, '-').collect();
            assert_eq!(parts.len(), 3);
            assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
            assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
            assert!(seen.insert(id));
        }
    }
}
