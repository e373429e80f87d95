//! End-to-end flow tests over the in-memory queue backend.
//!
//! These exercise the full core: enqueue through the processor, drain
//! through the pool and workers, and reconcile reaped items back into the
//! lifecycle store. No external services required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ai_dispatch::processor::request_processor::RequestProcessor;
use ai_dispatch::processor::store::RequestStatus;
use ai_dispatch::provider::manager::ProviderManager;
use ai_dispatch::provider::types::{AiProvider, AiRequest, AiResponse, ModelSpec};
use ai_dispatch::queue::backend::MemoryBackend;
use ai_dispatch::queue::item::{Priority, QueueItem};
use ai_dispatch::queue::manager::{QueueManager, QueueManagerConfig};
use ai_dispatch::queue::priority_queue::PriorityQueue;
use ai_dispatch::worker::pool::{WorkerPool, WorkerPoolConfig};
use ai_dispatch::ProviderError;

/// Provider that answers after an optional delay.
struct TestProvider {
    models: Vec<ModelSpec>,
    delay: Duration,
}

impl TestProvider {
    fn arc(delay: Duration) -> Arc<dyn AiProvider> {
        Arc::new(Self {
            models: vec![ModelSpec::new("test-model", 100_000, 50_000)],
            delay,
        })
    }
}

#[async_trait]
impl AiProvider for TestProvider {
    fn name(&self) -> &str {
        "test"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn default_model(&self) -> &str {
        "test-model"
    }

    async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(AiResponse::new(
            "resp",
            "test",
            "test-model",
            format!("answer to: {}", request.prompt),
        ))
    }

    fn validate_config(&self) -> bool {
        true
    }
}

struct Core {
    queue: Arc<PriorityQueue>,
    manager: Arc<QueueManager>,
    processor: Arc<RequestProcessor>,
}

fn build_core(manager_config: QueueManagerConfig, delay: Duration) -> Core {
    let queue = Arc::new(PriorityQueue::with_backend(
        Arc::new(MemoryBackend::new()),
        "core-flow",
    ));
    let manager = Arc::new(QueueManager::new(Arc::clone(&queue), manager_config));

    let mut providers = ProviderManager::new();
    providers.register(TestProvider::arc(delay)).unwrap();
    providers.set_default("test").unwrap();

    let processor = Arc::new(RequestProcessor::new(
        Arc::clone(&manager),
        Arc::new(providers),
    ));
    processor.attach_reaper_hook();

    Core {
        queue,
        manager,
        processor,
    }
}

async fn wait_for_status(
    processor: &RequestProcessor,
    request_id: &str,
    expected: RequestStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(record) = processor.get_request_status(request_id) {
            if record.status == expected {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "request {request_id} did not reach {expected:?} in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_enqueue_to_completion_through_the_pool() {
    let core = build_core(QueueManagerConfig::default(), Duration::ZERO);
    core.processor.start().await.unwrap();

    let pool_config = WorkerPoolConfig::new(1, 3)
        .with_queue_poll_interval(Duration::from_millis(20))
        .with_worker_health_check_interval(Duration::from_secs(60));
    let pool = Arc::new(
        WorkerPool::new(
            pool_config,
            Arc::clone(&core.queue),
            Arc::clone(&core.processor),
        )
        .unwrap(),
    );

    let high = core
        .processor
        .enqueue_request(AiRequest::new("urgent"), Some(Priority::High))
        .await
        .unwrap();
    let normal = core
        .processor
        .enqueue_request(AiRequest::new("routine"), None)
        .await
        .unwrap();
    let low = core
        .processor
        .enqueue_request(AiRequest::new("someday"), Some(Priority::Low))
        .await
        .unwrap();

    for id in [&high, &normal, &low] {
        assert_eq!(
            core.processor.get_request_status(id).unwrap().status,
            RequestStatus::Pending
        );
    }

    pool.start().await;

    for id in [&high, &normal, &low] {
        wait_for_status(
            &core.processor,
            id,
            RequestStatus::Completed,
            Duration::from_secs(5),
        )
        .await;
    }

    let record = core.processor.get_request_status(&high).unwrap();
    let metadata = record.metadata.unwrap();
    assert_eq!(
        metadata["response"]["content"].as_str().unwrap(),
        "answer to: urgent"
    );

    assert_eq!(core.queue.total_depth().await.unwrap(), 0);

    let health = pool.get_health().await;
    assert_eq!(health.performance.total_processed, 3);
    assert_eq!(health.performance.total_failed, 0);

    pool.stop().await;
    core.processor.stop().await;
}

#[tokio::test]
async fn test_cancellation_before_and_during_processing() {
    let core = build_core(QueueManagerConfig::default(), Duration::ZERO);
    core.processor.start().await.unwrap();

    let id = core
        .processor
        .enqueue_request(AiRequest::new("cancel me"), None)
        .await
        .unwrap();

    let outcome = core.processor.cancel_request(&id);
    assert!(outcome.success);
    assert_eq!(outcome.status, Some(RequestStatus::Cancelled));

    core.processor
        .update_request_status(&id, RequestStatus::Processing, None);
    let outcome = core.processor.cancel_request(&id);
    assert!(!outcome.success);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("Request is currently being processed and cannot be cancelled")
    );

    core.processor.stop().await;
}

#[tokio::test]
async fn test_reaper_demotion_and_terminal_drop_reach_the_lifecycle_store() {
    let config = QueueManagerConfig::default()
        .with_stale_request_timeout(Duration::from_millis(50))
        .with_retry_delay(Duration::from_millis(30))
        .with_max_retries(3);
    let core = build_core(config, Duration::ZERO);
    // Connect the queue without starting the manager: ticks are driven by
    // hand so the pass count is deterministic.
    core.queue.connect().await.unwrap();

    let id = core
        .processor
        .enqueue_request(AiRequest::new("stuck work"), None)
        .await
        .unwrap();

    // First pass: the item ages past the stale bound and is demoted.
    tokio::time::sleep(Duration::from_millis(60)).await;
    core.manager.reap_once().await.unwrap();

    let demoted = core.queue.peek().await.unwrap().unwrap();
    assert_eq!(demoted.id, id);
    assert_eq!(demoted.priority, Priority::Low);
    assert_eq!(demoted.attempts, 1);

    // Burn through the remaining budget.
    for expected in 2..=3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        core.manager.reap_once().await.unwrap();
        let item = core.queue.peek().await.unwrap().unwrap();
        assert_eq!(item.attempts, expected);
    }

    // Out of budget: the next stale observation drops the item and the
    // drop hook marks the record failed.
    tokio::time::sleep(Duration::from_millis(60)).await;
    core.manager.reap_once().await.unwrap();

    assert_eq!(core.queue.total_depth().await.unwrap(), 0);
    let record = core.processor.get_request_status(&id).unwrap();
    assert_eq!(record.status, RequestStatus::Failed);
    assert!(record.metadata.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("exhausting retries"));
}

#[tokio::test]
async fn test_worker_timeout_flows_into_the_lifecycle_store() {
    let core = build_core(QueueManagerConfig::default(), Duration::from_millis(200));
    core.processor.start().await.unwrap();

    let id = core
        .processor
        .enqueue_request(AiRequest::new("too slow"), None)
        .await
        .unwrap();

    let item: QueueItem = core.queue.dequeue().await.unwrap().unwrap();
    let worker = ai_dispatch::worker::worker::Worker::new(
        "worker-test-timeout",
        Arc::clone(&core.processor),
        ai_dispatch::worker::worker::WorkerConfig::default()
            .with_processing_timeout(Duration::from_millis(100)),
    );
    worker.start();

    let result = worker.process_request(item).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timeout"));

    let record = core.processor.get_request_status(&id).unwrap();
    assert_eq!(record.status, RequestStatus::Failed);
    assert!(record.metadata.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("timeout"));

    core.processor.stop().await;
}

#[tokio::test]
async fn test_validation_failures_leave_no_trace() {
    let core = build_core(QueueManagerConfig::default(), Duration::ZERO);
    core.processor.start().await.unwrap();

    let err = core
        .processor
        .enqueue_request(AiRequest::new("   "), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("prompt cannot be empty"));

    let err = core
        .processor
        .enqueue_request(AiRequest::new("hi").with_provider("nobody"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nobody"));

    assert_eq!(core.processor.record_count(), 0);
    assert_eq!(core.queue.total_depth().await.unwrap(), 0);

    core.processor.stop().await;
}
