//! Configuration for the scheduling core.
//!
//! One flat `CoreConfig` covers the queue namespace, the queue manager's
//! maintenance knobs, pool sizing, per-worker limits and provider
//! credentials. Everything is loadable from the environment with spec
//! defaults; only `max_workers` has no default.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::queue::manager::QueueManagerConfig;
use crate::worker::pool::WorkerPoolConfig;
use crate::worker::worker::WorkerConfig;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the scheduling core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    // Queue settings
    /// Location of the queue storage.
    pub redis_url: String,
    /// Namespace for queue keys.
    pub key_prefix: String,

    // Queue manager settings
    /// Period of the stale-request reaper.
    pub cleanup_interval: Duration,
    /// How long an item may be in flight before it counts as stuck.
    pub stale_request_timeout: Duration,
    /// Retry cool-off and re-admitter period.
    pub retry_delay: Duration,
    /// Retry budget for stale items.
    pub max_retries: u32,
    /// Upper bound on shutdown sequences.
    pub graceful_shutdown_timeout: Duration,

    // Worker pool settings
    /// Upper bound on the worker roster. Required; no default.
    pub max_workers: usize,
    /// Lower bound on the worker roster.
    pub min_workers: usize,
    /// Period of the queue poll task.
    pub queue_poll_interval: Duration,
    /// Period of the worker health supervision task.
    pub worker_health_check_interval: Duration,

    // Per-worker settings
    /// Upper bound on one request's processing time.
    pub processing_timeout: Duration,
    /// Retry budget carried on items a worker fails.
    pub worker_max_retries: u32,

    // Provider settings
    /// Anthropic credential; absence makes the provider invalid, not
    /// absent.
    pub anthropic_api_key: Option<String>,
    /// OpenAI credential; same semantics.
    pub openai_api_key: Option<String>,
    /// Provider designated as default; first valid provider otherwise.
    pub default_provider: Option<String>,
}

impl CoreConfig {
    /// Creates a configuration with spec defaults and the given worker
    /// ceiling.
    pub fn new(max_workers: usize) -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "queue".to_string(),
            cleanup_interval: Duration::from_secs(60),
            stale_request_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(30),
            max_retries: 3,
            graceful_shutdown_timeout: Duration::from_secs(10),
            max_workers,
            min_workers: 1,
            queue_poll_interval: Duration::from_secs(1),
            worker_health_check_interval: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(30),
            worker_max_retries: 3,
            anthropic_api_key: None,
            openai_api_key: None,
            default_provider: None,
        }
    }

    /// Loads configuration from the environment.
    ///
    /// `AI_DISPATCH_MAX_WORKERS` is required; everything else falls back
    /// to spec defaults.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingEnvVar` for the missing worker ceiling,
    /// `ConfigError::InvalidValue` for unparsable numbers,
    /// `ConfigError::ValidationFailed` for out-of-range combinations.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_workers = std::env::var("AI_DISPATCH_MAX_WORKERS")
            .map_err(|_| ConfigError::MissingEnvVar("AI_DISPATCH_MAX_WORKERS".to_string()))?;
        let max_workers = parse_value("AI_DISPATCH_MAX_WORKERS", &max_workers)?;
        Self::from_env_with_max_workers(max_workers)
    }

    /// Loads configuration from the environment with an explicit worker
    /// ceiling (e.g., from a CLI flag).
    pub fn from_env_with_max_workers(max_workers: usize) -> Result<Self, ConfigError> {
        let mut config = Self::new(max_workers);

        if let Ok(url) = std::env::var("AI_DISPATCH_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(prefix) = std::env::var("AI_DISPATCH_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        config.cleanup_interval =
            env_duration_secs("AI_DISPATCH_CLEANUP_INTERVAL_SECS", config.cleanup_interval)?;
        config.stale_request_timeout = env_duration_secs(
            "AI_DISPATCH_STALE_REQUEST_TIMEOUT_SECS",
            config.stale_request_timeout,
        )?;
        config.retry_delay =
            env_duration_secs("AI_DISPATCH_RETRY_DELAY_SECS", config.retry_delay)?;
        config.max_retries = env_parse("AI_DISPATCH_MAX_RETRIES", config.max_retries)?;
        config.graceful_shutdown_timeout = env_duration_secs(
            "AI_DISPATCH_GRACEFUL_SHUTDOWN_TIMEOUT_SECS",
            config.graceful_shutdown_timeout,
        )?;

        config.min_workers = env_parse("AI_DISPATCH_MIN_WORKERS", config.min_workers)?;
        config.queue_poll_interval = env_duration_millis(
            "AI_DISPATCH_QUEUE_POLL_INTERVAL_MS",
            config.queue_poll_interval,
        )?;
        config.worker_health_check_interval = env_duration_secs(
            "AI_DISPATCH_WORKER_HEALTH_CHECK_INTERVAL_SECS",
            config.worker_health_check_interval,
        )?;

        config.processing_timeout = env_duration_secs(
            "AI_DISPATCH_PROCESSING_TIMEOUT_SECS",
            config.processing_timeout,
        )?;
        config.worker_max_retries =
            env_parse("AI_DISPATCH_WORKER_MAX_RETRIES", config.worker_max_retries)?;

        config.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        config.default_provider = std::env::var("AI_DISPATCH_DEFAULT_PROVIDER").ok();

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url must not be empty".to_string(),
            ));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::ValidationFailed(format!(
                "min_workers ({}) cannot exceed max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }

    /// Queue manager view of this configuration.
    pub fn manager_config(&self) -> QueueManagerConfig {
        QueueManagerConfig::default()
            .with_cleanup_interval(self.cleanup_interval)
            .with_stale_request_timeout(self.stale_request_timeout)
            .with_retry_delay(self.retry_delay)
            .with_max_retries(self.max_retries)
            .with_graceful_shutdown_timeout(self.graceful_shutdown_timeout)
    }

    /// Per-worker view of this configuration.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_processing_timeout(self.processing_timeout)
            .with_max_retries(self.worker_max_retries)
            .with_health_check_interval(self.worker_health_check_interval)
    }

    /// Worker pool view of this configuration.
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.min_workers, self.max_workers)
            .with_queue_poll_interval(self.queue_poll_interval)
            .with_worker_health_check_interval(self.worker_health_check_interval)
            .with_shutdown_timeout(self.graceful_shutdown_timeout)
            .with_worker_config(self.worker_config())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(
        key,
        default.as_secs(),
    )?))
}

fn env_duration_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(env_parse(
        key,
        default.as_millis() as u64,
    )?))
}
