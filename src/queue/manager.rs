//! Queue manager: connection lifetime and background maintenance.
//!
//! The manager exclusively owns the priority queue connection and runs two
//! periodic tasks:
//!
//! - **Stale-request reaper**: detects items stuck in flight longer than the
//!   stale timeout, re-admits them at low priority with an incremented
//!   attempt counter, and drops them once retries are exhausted.
//! - **Retry re-admitter**: rotates the queue head so items cooling off
//!   between attempts do not block items behind them.
//!
//! Both tasks touch exactly one item per tick, which bounds per-tick work
//! and prevents either task from monopolizing the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::item::{Priority, QueueItem};
use super::priority_queue::{PriorityQueue, QueueError, QueueMetrics};

/// Delay before the first tick of each background task, so a `stop` issued
/// immediately after `start` cancels them before they touch the queue.
const INITIAL_TASK_DELAY: Duration = Duration::from_millis(100);

/// Callback invoked when the reaper drops an item after exhausting retries.
///
/// The queue has no access to the request lifecycle store; the composition
/// root wires this hook to mark the corresponding request record failed so
/// queue state and lifecycle state cannot drift.
pub type DropHook = Arc<dyn Fn(&QueueItem) + Send + Sync>;

/// Configuration for the queue manager's background tasks.
#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    /// Period of the stale-request reaper.
    pub cleanup_interval: Duration,
    /// How long an item may be in flight before it counts as stuck.
    pub stale_request_timeout: Duration,
    /// Cool-off between retry attempts, and the re-admitter period.
    pub retry_delay: Duration,
    /// Attempts after which a stale item is dropped instead of retried.
    pub max_retries: u32,
    /// Upper bound on the whole shutdown sequence.
    pub graceful_shutdown_timeout: Duration,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            stale_request_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(30),
            max_retries: 3,
            graceful_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueManagerConfig {
    /// Sets the reaper period.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Sets the stale-request timeout.
    pub fn with_stale_request_timeout(mut self, timeout: Duration) -> Self {
        self.stale_request_timeout = timeout;
        self
    }

    /// Sets the retry cool-off.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the shutdown bound.
    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }
}

/// Health snapshot of the queue manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerHealth {
    /// Whether `start` has run without a matching `stop`.
    pub is_running: bool,
    /// `is_running` and the queue connection is ready.
    pub is_healthy: bool,
    /// Whether the queue connection is ready.
    pub redis_connected: bool,
    /// Whether the two background tasks are scheduled.
    pub background_tasks_active: bool,
    /// Live queue depths (zeros when the queue is unreachable).
    pub queue_metrics: QueueMetrics,
    /// Last time the reaper ticked.
    pub last_cleanup_run: Option<DateTime<Utc>>,
    /// Last time the retry re-admitter ticked.
    pub last_retry_process_run: Option<DateTime<Utc>>,
}

/// Owns the priority queue connection and its maintenance tasks.
pub struct QueueManager {
    queue: Arc<PriorityQueue>,
    config: QueueManagerConfig,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    drop_hook: std::sync::RwLock<Option<DropHook>>,
    last_cleanup_run: std::sync::RwLock<Option<DateTime<Utc>>>,
    last_retry_run: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl QueueManager {
    /// Creates a manager over the given queue.
    pub fn new(queue: Arc<PriorityQueue>, config: QueueManagerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            config,
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            drop_hook: std::sync::RwLock::new(None),
            last_cleanup_run: std::sync::RwLock::new(None),
            last_retry_run: std::sync::RwLock::new(None),
        }
    }

    /// Installs the hook invoked when the reaper drops an item for good.
    pub fn set_drop_hook(&self, hook: DropHook) {
        *self.drop_hook.write().expect("lock poisoned") = Some(hook);
    }

    /// Returns the managed queue.
    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    /// Whether the manager is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connects the queue and schedules the background tasks.
    ///
    /// Idempotent: a second `start` is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates the connection failure; the manager stays stopped.
    pub async fn start(self: &Arc<Self>) -> Result<(), QueueError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.queue.connect().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_reaper());
        tasks.push(self.spawn_readmitter());

        info!(
            cleanup_interval_ms = self.config.cleanup_interval.as_millis() as u64,
            retry_delay_ms = self.config.retry_delay.as_millis() as u64,
            "Queue manager started"
        );
        Ok(())
    }

    /// Cancels the background tasks, awaits in-flight ticks and disconnects
    /// the queue, all bounded by `graceful_shutdown_timeout`.
    ///
    /// Idempotent: a second `stop` is a no-op.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Ignore send error - tasks may have already stopped
        let _ = self.shutdown_tx.send(());

        let mut handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let joined = tokio::time::timeout(
            self.config.graceful_shutdown_timeout,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        if joined.is_err() {
            warn!("Queue manager shutdown timed out; aborting background tasks");
            for handle in &handles {
                handle.abort();
            }
        }

        self.queue.disconnect().await;
        info!("Queue manager stopped");
    }

    /// One reaper tick: pop a single item and decide its fate.
    ///
    /// Stale items with remaining retry budget are re-admitted at low
    /// priority (demoting stuck work so fresh work overtakes it); stale
    /// items out of budget are dropped through the drop hook; fresh items
    /// go back at their original priority.
    pub async fn reap_once(&self) -> Result<(), QueueError> {
        let now = Utc::now();
        *self.last_cleanup_run.write().expect("lock poisoned") = Some(now);

        let Some(item) = self.queue.dequeue().await? else {
            return Ok(());
        };

        if !item.is_stale(self.config.stale_request_timeout, now) {
            return self.queue.enqueue_item(&item).await;
        }

        if item.attempts < self.config.max_retries {
            let mut retry = item.clone();
            retry.mark_attempt(now);
            retry.priority = Priority::Low;
            self.queue.enqueue_item(&retry).await?;
            info!(
                id = %retry.id,
                attempts = retry.attempts,
                "Stale item re-admitted at low priority"
            );
        } else {
            warn!(
                id = %item.id,
                attempts = item.attempts,
                "Dropping stale item after exhausting retries"
            );
            let hook = self.drop_hook.read().expect("lock poisoned").clone();
            if let Some(hook) = hook {
                hook(&item);
            }
        }

        Ok(())
    }

    /// One retry tick: rotate the queue head.
    ///
    /// The dequeued item goes back at its original priority whether or not
    /// its cool-off elapsed; rotating guarantees the head advances so items
    /// behind a cooling-off item can be seen.
    pub async fn readmit_once(&self) -> Result<(), QueueError> {
        let now = Utc::now();
        *self.last_retry_run.write().expect("lock poisoned") = Some(now);

        let Some(item) = self.queue.dequeue().await? else {
            return Ok(());
        };

        let ready = item.ready_for_retry(self.config.retry_delay, now);
        self.queue.enqueue_item(&item).await?;

        if ready {
            debug!(id = %item.id, attempts = item.attempts, "Re-admitted item for retry");
        } else {
            debug!(id = %item.id, "Item still cooling off; rotated to tail");
        }
        Ok(())
    }

    /// Health snapshot; remains callable when the queue is degraded.
    pub async fn health(&self) -> ManagerHealth {
        let is_running = self.is_running();
        let redis_connected = self.queue.is_connected().await;
        let queue_metrics = self.queue.metrics().await.unwrap_or_default();
        let background_tasks_active = is_running && !self.tasks.lock().await.is_empty();

        ManagerHealth {
            is_running,
            is_healthy: is_running && redis_connected,
            redis_connected,
            background_tasks_active,
            queue_metrics,
            last_cleanup_run: *self.last_cleanup_run.read().expect("lock poisoned"),
            last_retry_process_run: *self.last_retry_run.read().expect("lock poisoned"),
        }
    }

    fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tokio::time::sleep(INITIAL_TASK_DELAY) => {}
            }

            loop {
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.reap_once().await {
                    warn!(error = %e, "Stale-request reaper tick failed");
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(manager.config.cleanup_interval) => {}
                }
            }
        })
    }

    fn spawn_readmitter(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tokio::time::sleep(INITIAL_TASK_DELAY) => {}
            }

            loop {
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = manager.readmit_once().await {
                    warn!(error = %e, "Retry re-admitter tick failed");
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(manager.config.retry_delay) => {}
                }
            }
        })
    }
}
