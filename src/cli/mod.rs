//! Command-line interface for discussion-forge.
//!
//! Provides the `run`, `discussions`, `annotations` and `export` commands.

mod commands;

pub use commands::{parse_cli, run, run_experiment, run_with_cli, Cli, Commands, RunSummary};
