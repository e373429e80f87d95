//! Redis implementation of the queue storage protocol.
//!
//! Each per-priority sequence is a Redis list: RPUSH to append, LPOP to pop
//! the head, LINDEX 0 to peek, LLEN for depth. `ConnectionManager` handles
//! reconnection automatically.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::backend::QueueBackend;
use super::priority_queue::QueueError;

/// Redis-backed queue storage.
pub struct RedisBackend {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisBackend {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a backend from an existing connection manager.
    ///
    /// Useful when sharing a connection pool across multiple components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn append(&self, key: &str, value: String) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn take_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.lindex(key, 0).await?;
        Ok(value)
    }

    async fn length(&self, key: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }
}
