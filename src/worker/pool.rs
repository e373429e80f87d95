//! Elastic worker pool.
//!
//! The pool owns the set of workers and the two background tasks that keep
//! them busy and healthy: a poll loop that sizes the roster to the queue
//! depth and hands items to idle workers, and a health loop that replaces
//! workers whose failure ratio crossed the line.
//!
//! Queue-read failures never crash the pool; they are logged and the next
//! tick tries again.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::processor::request_processor::RequestProcessor;
use crate::queue::priority_queue::{PriorityQueue, QueueError, QueueMetrics};
use crate::worker::worker::{Worker, WorkerConfig, WorkerHealth, WorkerStatus};

/// Queue items one worker is expected to absorb; scaling targets
/// `ceil(depth / this)` workers.
pub const QUEUE_ITEMS_PER_WORKER: usize = 5;

/// Errors surfaced by the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Pool configuration failed validation at construction.
    #[error("Invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Upper bound on the roster size.
    pub max_workers: usize,
    /// Lower bound on the roster size.
    pub min_workers: usize,
    /// Period of the queue poll (scale + drain) task.
    pub queue_poll_interval: Duration,
    /// Period of the worker health supervision task.
    pub worker_health_check_interval: Duration,
    /// Upper bound on stopping all workers during shutdown.
    pub shutdown_timeout: Duration,
    /// Queue items one worker is expected to absorb.
    pub queue_items_per_worker: usize,
    /// Configuration handed to every worker.
    pub worker_config: WorkerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            min_workers: 1,
            queue_poll_interval: Duration::from_secs(1),
            worker_health_check_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            queue_items_per_worker: QUEUE_ITEMS_PER_WORKER,
            worker_config: WorkerConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the given roster bounds.
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Default::default()
        }
    }

    /// Sets the queue poll period.
    pub fn with_queue_poll_interval(mut self, interval: Duration) -> Self {
        self.queue_poll_interval = interval;
        self
    }

    /// Sets the health supervision period.
    pub fn with_worker_health_check_interval(mut self, interval: Duration) -> Self {
        self.worker_health_check_interval = interval;
        self
    }

    /// Sets the shutdown bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-worker configuration.
    pub fn with_worker_config(mut self, worker_config: WorkerConfig) -> Self {
        self.worker_config = worker_config;
        self
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) cannot exceed max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.queue_items_per_worker == 0 {
            return Err(PoolError::InvalidConfig(
                "queue_items_per_worker must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregated processing totals across the roster.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolPerformance {
    pub total_processed: u64,
    pub total_failed: u64,
    pub average_processing_time_ms: u64,
}

/// Health snapshot of the pool and every worker in it.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub is_running: bool,
    pub is_healthy: bool,
    pub worker_count: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub failed_workers: usize,
    /// Live depths; zeros when the queue is unreachable.
    pub queue_metrics: QueueMetrics,
    pub performance: PoolPerformance,
    pub workers: Vec<WorkerHealth>,
}

/// Elastic set of workers polling a shared priority queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<PriorityQueue>,
    processor: Arc<RequestProcessor>,
    workers: std::sync::RwLock<Vec<Arc<Worker>>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    spawned_total: AtomicUsize,
    rotation: AtomicUsize,
}

impl WorkerPool {
    /// Creates a pool; the configuration is validated here.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for out-of-range bounds.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<PriorityQueue>,
        processor: Arc<RequestProcessor>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            queue,
            processor,
            workers: std::sync::RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            spawned_total: AtomicUsize::new(0),
            rotation: AtomicUsize::new(0),
        })
    }

    /// Whether the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current roster size.
    pub fn worker_count(&self) -> usize {
        self.workers.read().expect("lock poisoned").len()
    }

    /// Starts `min_workers` workers and the two background tasks.
    /// Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut roster = self.workers.write().expect("lock poisoned");
            for _ in 0..self.config.min_workers {
                roster.push(self.create_worker());
            }
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_poll_loop());
        tasks.push(self.spawn_health_loop());

        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "Worker pool started"
        );
    }

    /// Cancels the background tasks and stops every worker in parallel,
    /// bounded by `shutdown_timeout`. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Ignore send error - tasks may have already stopped
        let _ = self.shutdown_tx.send(());

        let mut handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let joined = tokio::time::timeout(
            Duration::from_secs(1),
            futures::future::join_all(handles.iter_mut()),
        )
        .await;
        if joined.is_err() {
            for handle in &handles {
                handle.abort();
            }
        }

        let workers: Vec<Arc<Worker>> = self.workers.write().expect("lock poisoned").drain(..).collect();
        let stop_all = futures::future::join_all(workers.iter().map(|w| w.stop()));
        if tokio::time::timeout(self.config.shutdown_timeout, stop_all)
            .await
            .is_err()
        {
            warn!("Worker pool shutdown timed out waiting for workers");
        }

        info!("Worker pool stopped");
    }

    /// Sizes the roster to the queue depth:
    /// `clamp(ceil(depth / queue_items_per_worker), min, max)`.
    ///
    /// Growth appends started workers; shrinkage stops workers from the
    /// tail, never going below `min_workers`. Queue-metric errors are
    /// logged, not raised.
    pub async fn scale_workers(&self) {
        let metrics = match self.queue.metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "Failed to read queue metrics, skipping scale pass");
                return;
            }
        };

        let per_worker = self.config.queue_items_per_worker;
        let target = metrics
            .total_depth
            .div_ceil(per_worker)
            .clamp(self.config.min_workers, self.config.max_workers);
        let current = self.worker_count();

        if target > current {
            let additions: Vec<Arc<Worker>> =
                (current..target).map(|_| self.create_worker()).collect();
            self.workers
                .write()
                .expect("lock poisoned")
                .extend(additions);
            info!(from = current, to = target, depth = metrics.total_depth, "Scaled pool up");
        } else if target < current && current > self.config.min_workers {
            let removable = (current - target).min(current - self.config.min_workers);
            let removed: Vec<Arc<Worker>> = {
                let mut roster = self.workers.write().expect("lock poisoned");
                let keep = roster.len().saturating_sub(removable);
                roster.split_off(keep)
            };
            futures::future::join_all(removed.iter().map(|w| w.stop())).await;
            info!(from = current, to = current - removable, "Scaled pool down");
        }
    }

    /// Stops and removes unhealthy workers, then tops the roster back up
    /// to `min_workers`.
    pub async fn check_worker_health(&self) {
        let unhealthy: Vec<Arc<Worker>> = {
            let roster = self.workers.read().expect("lock poisoned");
            roster
                .iter()
                .filter(|w| !w.get_health().is_healthy)
                .cloned()
                .collect()
        };

        if !unhealthy.is_empty() {
            let doomed: Vec<String> = unhealthy.iter().map(|w| w.get_id().to_string()).collect();
            warn!(workers = ?doomed, "Removing unhealthy workers");

            self.workers
                .write()
                .expect("lock poisoned")
                .retain(|w| !doomed.iter().any(|id| id == w.get_id()));
            futures::future::join_all(unhealthy.iter().map(|w| w.stop())).await;
        }

        let deficit = self
            .config
            .min_workers
            .saturating_sub(self.worker_count());
        if deficit > 0 {
            let replacements: Vec<Arc<Worker>> =
                (0..deficit).map(|_| self.create_worker()).collect();
            self.workers
                .write()
                .expect("lock poisoned")
                .extend(replacements);
            info!(replaced = deficit, "Replaced workers to restore minimum roster");
        }
    }

    /// Hands up to `min(idle workers, depth)` freshly dequeued items to
    /// idle workers, round-robin so no long-lived worker starves. Each
    /// handoff processes concurrently.
    pub async fn process_queue(&self) {
        let depth = match self.queue.total_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "Failed to read queue depth, skipping drain pass");
                return;
            }
        };
        if depth == 0 {
            return;
        }

        let available: Vec<Arc<Worker>> = {
            let roster = self.workers.read().expect("lock poisoned");
            roster
                .iter()
                .filter(|w| w.get_status() == WorkerStatus::Running)
                .cloned()
                .collect()
        };
        if available.is_empty() {
            return;
        }

        let offset = self.rotation.fetch_add(1, Ordering::SeqCst);
        let handoffs = available.len().min(depth);

        for i in 0..handoffs {
            let worker = Arc::clone(&available[(offset + i) % available.len()]);

            match self.queue.dequeue().await {
                Ok(Some(item)) => {
                    tokio::spawn(async move {
                        let request_id = item.id.clone();
                        let result = worker.process_request(item).await;
                        if !result.success {
                            debug!(
                                worker_id = worker.get_id(),
                                request_id = %request_id,
                                error = result.error.as_deref().unwrap_or("unknown"),
                                "Handoff processing failed"
                            );
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to dequeue item for handoff");
                    break;
                }
            }
        }
    }

    /// Aggregated health of the pool and its workers. Queue metrics fall
    /// back to zeros when the queue is unreachable.
    pub async fn get_health(&self) -> PoolHealth {
        let workers: Vec<WorkerHealth> = {
            let roster = self.workers.read().expect("lock poisoned");
            roster.iter().map(|w| w.get_health()).collect()
        };

        let worker_count = workers.len();
        let active_workers = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Processing)
            .count();
        let idle_workers = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Running)
            .count();
        let failed_workers = workers.iter().filter(|w| !w.is_healthy).count();

        let total_processed: u64 = workers.iter().map(|w| w.processed_requests).sum();
        let total_failed: u64 = workers.iter().map(|w| w.failed_requests).sum();
        let total_time: u64 = workers
            .iter()
            .map(|w| w.average_processing_time_ms * w.processed_requests)
            .sum();

        let is_running = self.is_running();
        let queue_metrics = self.queue.metrics().await.unwrap_or_default();

        PoolHealth {
            is_running,
            is_healthy: is_running && (failed_workers as f64) < 0.5 * worker_count as f64,
            worker_count,
            active_workers,
            idle_workers,
            failed_workers,
            queue_metrics,
            performance: PoolPerformance {
                total_processed,
                total_failed,
                average_processing_time_ms: if total_processed > 0 {
                    total_time / total_processed
                } else {
                    0
                },
            },
            workers,
        }
    }

    /// Creates and starts a worker with a unique `worker-{epoch}-{n}` id.
    fn create_worker(&self) -> Arc<Worker> {
        let n = self.spawned_total.fetch_add(1, Ordering::SeqCst);
        let id = format!("worker-{}-{}", Utc::now().timestamp_millis(), n);

        let worker = Arc::new(Worker::new(
            id,
            Arc::clone(&self.processor),
            self.config.worker_config.clone(),
        ));
        worker.start();
        worker
    }

    fn spawn_poll_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(pool.config.queue_poll_interval) => {}
                }
                if !pool.running.load(Ordering::SeqCst) {
                    break;
                }
                pool.scale_workers().await;
                pool.process_queue().await;
            }
        })
    }

    fn spawn_health_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(pool.config.worker_health_check_interval) => {}
                }
                if !pool.running.load(Ordering::SeqCst) {
                    break;
                }
                pool.check_worker_health().await;
            }
        })
    }
}
