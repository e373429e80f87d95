//! Binary entry point for the ai-dispatch scheduling core.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` takes precedence; the CLI
/// flag is the fallback filter.
fn init_tracing(fallback_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = ai_dispatch::cli::parse_cli();
    init_tracing(&cli.log_level);

    ai_dispatch::cli::run_with_cli(cli).await
}
