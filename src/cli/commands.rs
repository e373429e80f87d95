//! CLI command definitions and handlers.
//!
//! The `run` command is the composition root: it builds the queue, the
//! queue manager, the provider registry, the request processor and the
//! worker pool, wires the reaper drop hook, and serves until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::config::CoreConfig;
use crate::metrics::{init_metrics, MetricsCollector};
use crate::processor::request_processor::RequestProcessor;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::manager::ProviderManager;
use crate::provider::openai::OpenAiProvider;
use crate::provider::registry::ProviderRegistry;
use crate::provider::types::{AiProvider, AiRequest};
use crate::queue::item::Priority;
use crate::queue::manager::QueueManager;
use crate::queue::priority_queue::PriorityQueue;
use crate::worker::pool::WorkerPool;

/// AI request scheduling core.
#[derive(Debug, Parser)]
#[command(name = "ai-dispatch", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduling core until interrupted.
    Run {
        /// Upper bound on the worker roster.
        #[arg(long, env = "AI_DISPATCH_MAX_WORKERS")]
        max_workers: usize,

        /// How often to sample health into the metrics gauges, in seconds.
        #[arg(long, default_value_t = 15)]
        metrics_sample_secs: u64,
    },

    /// Admit one request to the queue and print its id.
    Enqueue {
        /// Prompt text of the request.
        prompt: String,

        /// Provider to route to; the configured default applies otherwise.
        #[arg(long)]
        provider: Option<String>,

        /// Model to use; the provider's default applies otherwise.
        #[arg(long)]
        model: Option<String>,

        /// Priority level for the request.
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },

    /// Print queue metrics and provider configuration health.
    Health,
}

/// Priority level accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run {
            max_workers,
            metrics_sample_secs,
        } => run_core(max_workers, metrics_sample_secs).await,
        Command::Enqueue {
            prompt,
            provider,
            model,
            priority,
        } => enqueue_one(prompt, provider, model, priority.into()).await,
        Command::Health => print_health().await,
    }
}

/// Builds the provider candidates from configuration.
///
/// Providers with absent credentials are still constructed; the registry
/// partitions them out via `validate_config`.
fn provider_candidates(config: &CoreConfig) -> Vec<Arc<dyn AiProvider>> {
    vec![
        Arc::new(AnthropicProvider::new(
            config.anthropic_api_key.clone().unwrap_or_default(),
        )),
        Arc::new(OpenAiProvider::new(
            config.openai_api_key.clone().unwrap_or_default(),
        )),
    ]
}

/// Wires the full core: queue, manager, providers, processor, pool.
fn build_core(config: &CoreConfig) -> anyhow::Result<(Arc<RequestProcessor>, Arc<WorkerPool>)> {
    let queue = Arc::new(PriorityQueue::new(
        config.redis_url.as_str(),
        config.key_prefix.as_str(),
    ));
    let manager = Arc::new(QueueManager::new(
        Arc::clone(&queue),
        config.manager_config(),
    ));

    let registry = ProviderRegistry::new(provider_candidates(config));
    let mut providers: ProviderManager = registry.create_manager()?;
    if let Some(default) = &config.default_provider {
        providers.set_default(default)?;
    }

    let processor = Arc::new(RequestProcessor::new(manager, Arc::new(providers)));
    processor.attach_reaper_hook();

    let pool = Arc::new(WorkerPool::new(
        config.pool_config(),
        queue,
        Arc::clone(&processor),
    )?);

    Ok((processor, pool))
}

async fn run_core(max_workers: usize, metrics_sample_secs: u64) -> anyhow::Result<()> {
    let config = CoreConfig::from_env_with_max_workers(max_workers)?;
    let (processor, pool) = build_core(&config)?;

    init_metrics()?;
    let collector = MetricsCollector::new();

    processor.start().await?;
    pool.start().await;
    info!(
        redis_url = %config.redis_url,
        key_prefix = %config.key_prefix,
        max_workers = config.max_workers,
        "Scheduling core running, press ctrl-c to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(metrics_sample_secs)) => {
                collector.observe_pool(&pool.get_health().await);
            }
        }
    }

    info!("Shutting down");
    pool.stop().await;
    processor.stop().await;
    Ok(())
}

async fn enqueue_one(
    prompt: String,
    provider: Option<String>,
    model: Option<String>,
    priority: Priority,
) -> anyhow::Result<()> {
    let config = CoreConfig::from_env_with_max_workers(1)?;
    let (processor, _pool) = build_core(&config)?;

    processor.start().await?;

    let mut request = AiRequest::new(prompt);
    if let Some(provider) = provider {
        request = request.with_provider(provider);
    }
    if let Some(model) = model {
        request = request.with_model(model);
    }

    let request_id = processor.enqueue_request(request, Some(priority)).await?;
    println!("{request_id}");

    processor.stop().await;
    Ok(())
}

async fn print_health() -> anyhow::Result<()> {
    let config = CoreConfig::from_env_with_max_workers(1)?;

    let registry = ProviderRegistry::new(provider_candidates(&config));
    let provider_reports = registry.check_health();

    let queue = PriorityQueue::new(config.redis_url.as_str(), config.key_prefix.as_str());
    queue.connect().await?;
    let queue_metrics = queue.metrics().await?;
    queue.disconnect().await;

    let report = serde_json::json!({
        "queue": queue_metrics,
        "providers": provider_reports,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
