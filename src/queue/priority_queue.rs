//! Three-level priority queue atop a shared key-value service.
//!
//! The queue keeps one ordered sequence per priority level under a
//! configurable key prefix, so multiple independent queue namespaces can
//! coexist on one storage service. Dequeue discipline is strict priority
//! (high before normal before low) with FIFO order within a level.
//!
//! All mutating operations require the connection to be ready; operations on
//! an unready connection fail fast with [`QueueError::NotConnected`].
//! Connection-level failures are broadcast on an event channel so higher
//! layers can react.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use super::backend::QueueBackend;
use super::item::{Priority, QueueItem};
use super::redis::RedisBackend;

/// Capacity of the connection event channel. Slow subscribers lag rather
/// than block queue operations.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Errors that can occur during queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Failed to establish the storage connection.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted before `connect` (or after `disconnect`).
    #[error("Queue is not connected")]
    NotConnected,

    /// Storage operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Queue item could not be encoded or decoded.
    #[error("Queue item serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connection lifecycle events emitted by the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The storage connection became ready.
    Connected,
    /// The storage connection was shut down.
    Disconnected,
    /// A storage operation failed; the message preserves the cause.
    ConnectionError(String),
}

/// Queue depths per priority level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    /// Items waiting at high priority.
    pub high: usize,
    /// Items waiting at normal priority.
    pub normal: usize,
    /// Items waiting at low priority.
    pub low: usize,
    /// Sum of the three levels.
    pub total_depth: usize,
}

/// Where the queue obtains its storage backend on `connect`.
enum BackendSource {
    /// Open a Redis connection against this URL.
    Redis { url: String },
    /// Use an externally supplied backend (tests, local development).
    External(Arc<dyn QueueBackend>),
}

/// Ordered multi-level FIFO of queue items.
///
/// Safe for concurrent use by multiple workers: ordering within a priority
/// level is preserved end-to-end by the storage sequence.
pub struct PriorityQueue {
    source: BackendSource,
    key_prefix: String,
    backend: RwLock<Option<Arc<dyn QueueBackend>>>,
    events: broadcast::Sender<QueueEvent>,
}

impl PriorityQueue {
    /// Creates a queue that will connect to Redis at `redis_url`.
    ///
    /// The queue starts disconnected; call [`PriorityQueue::connect`] before
    /// any operation.
    pub fn new(redis_url: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source: BackendSource::Redis {
                url: redis_url.into(),
            },
            key_prefix: key_prefix.into(),
            backend: RwLock::new(None),
            events,
        }
    }

    /// Creates a queue over an externally supplied backend.
    ///
    /// The queue still starts disconnected so the connection lifecycle is
    /// identical to the Redis path.
    pub fn with_backend(backend: Arc<dyn QueueBackend>, key_prefix: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source: BackendSource::External(backend),
            key_prefix: key_prefix.into(),
            backend: RwLock::new(None),
            events,
        }
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Makes the queue ready for operations. No-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the storage connection
    /// cannot be established; the failure is also broadcast as a
    /// [`QueueEvent::ConnectionError`].
    pub async fn connect(&self) -> Result<(), QueueError> {
        let mut slot = self.backend.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let backend: Arc<dyn QueueBackend> = match &self.source {
            BackendSource::Redis { url } => match RedisBackend::connect(url).await {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    let _ = self.events.send(QueueEvent::ConnectionError(e.to_string()));
                    return Err(e);
                }
            },
            BackendSource::External(backend) => Arc::clone(backend),
        };

        *slot = Some(backend);
        let _ = self.events.send(QueueEvent::Connected);
        debug!(key_prefix = %self.key_prefix, "Priority queue connected");
        Ok(())
    }

    /// Releases the storage connection. No-op when already disconnected.
    pub async fn disconnect(&self) {
        let mut slot = self.backend.write().await;
        if slot.take().is_some() {
            let _ = self.events.send(QueueEvent::Disconnected);
            debug!(key_prefix = %self.key_prefix, "Priority queue disconnected");
        }
    }

    /// Whether the queue is ready for operations.
    pub async fn is_connected(&self) -> bool {
        self.backend.read().await.is_some()
    }

    /// Returns the key prefix configured for this queue namespace.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Storage key for one priority level.
    fn key_for(&self, priority: Priority) -> String {
        format!("{}:{}", self.key_prefix, priority.as_str())
    }

    async fn backend(&self) -> Result<Arc<dyn QueueBackend>, QueueError> {
        self.backend
            .read()
            .await
            .clone()
            .ok_or(QueueError::NotConnected)
    }

    /// Broadcasts storage-level failures to event subscribers.
    fn report(&self, error: &QueueError) {
        if matches!(
            error,
            QueueError::Redis(_) | QueueError::ConnectionFailed(_) | QueueError::NotConnected
        ) {
            let _ = self
                .events
                .send(QueueEvent::ConnectionError(error.to_string()));
        }
    }

    /// Admits a new item at the given priority.
    pub async fn enqueue(
        &self,
        id: impl Into<String>,
        data: serde_json::Value,
        priority: Priority,
    ) -> Result<(), QueueError> {
        self.enqueue_item(&QueueItem::new(id, data, priority)).await
    }

    /// Admits an existing item, preserving its attempt counter and
    /// timestamps. The item lands at the tail of its `priority` level.
    pub async fn enqueue_item(&self, item: &QueueItem) -> Result<(), QueueError> {
        let encoded = serde_json::to_string(item)?;
        let backend = self.backend().await?;

        if let Err(e) = backend.append(&self.key_for(item.priority), encoded).await {
            self.report(&e);
            return Err(e);
        }

        debug!(id = %item.id, priority = %item.priority, "Enqueued item");
        Ok(())
    }

    /// Removes and returns the highest-priority item, or `None` when all
    /// levels are empty.
    ///
    /// # Errors
    ///
    /// A payload that fails to parse surfaces `QueueError::Serialization`
    /// for this call only; the malformed item is already consumed and is NOT
    /// requeued. Requeue policy belongs to the queue manager.
    pub async fn dequeue(&self) -> Result<Option<QueueItem>, QueueError> {
        let backend = self.backend().await?;

        for priority in Priority::ALL {
            let raw = match backend.take_front(&self.key_for(priority)).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.report(&e);
                    return Err(e);
                }
            };

            if let Some(raw) = raw {
                let item: QueueItem = serde_json::from_str(&raw).map_err(|e| {
                    warn!(priority = %priority, error = %e, "Dropping unparsable queue item");
                    QueueError::Serialization(e)
                })?;
                return Ok(Some(item));
            }
        }

        Ok(None)
    }

    /// Returns the highest-priority item without removing it.
    pub async fn peek(&self) -> Result<Option<QueueItem>, QueueError> {
        let backend = self.backend().await?;

        for priority in Priority::ALL {
            let raw = match backend.peek_front(&self.key_for(priority)).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.report(&e);
                    return Err(e);
                }
            };

            if let Some(raw) = raw {
                let item: QueueItem = serde_json::from_str(&raw)?;
                return Ok(Some(item));
            }
        }

        Ok(None)
    }

    /// Number of items waiting at one priority level.
    pub async fn depth(&self, priority: Priority) -> Result<usize, QueueError> {
        let backend = self.backend().await?;
        backend.length(&self.key_for(priority)).await.map_err(|e| {
            self.report(&e);
            e
        })
    }

    /// Total number of items across all levels.
    pub async fn total_depth(&self) -> Result<usize, QueueError> {
        Ok(self.metrics().await?.total_depth)
    }

    /// Depth snapshot across all levels.
    pub async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let high = self.depth(Priority::High).await?;
        let normal = self.depth(Priority::Normal).await?;
        let low = self.depth(Priority::Low).await?;

        Ok(QueueMetrics {
            high,
            normal,
            low,
            total_depth: high + normal + low,
        })
    }

    /// Whether all levels are empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.total_depth().await? == 0)
    }
}
