//! Command-line interface for ai-dispatch.
//!
//! Provides the `run` composition root plus one-shot `enqueue` and
//! `health` commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
