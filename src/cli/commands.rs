//! CLI command definitions for discussion-forge.
//!
//! Every command that talks to a model reads a YAML experiment config (see
//! [`crate::config`]). The model is built once per invocation and shared by
//! all actors.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ActionsConfig, ExperimentConfig};
use crate::experiments::{AnnotationExperiment, DiscussionExperiment, ExperimentReport};
use crate::export::{export_dataset, ExportSummary};
use crate::llm::{build_model, LanguageModel};

/// Synthetic discussion and annotation generator.
#[derive(Parser)]
#[command(name = "discussion-forge")]
#[command(about = "Simulate LLM discussions, annotate them and export datasets")]
#[command(version)]
#[command(
    long_about = "discussion-forge runs synthetic multi-party discussions between LLM personas, \
has LLM annotators label every message, and exports the joined result as Parquet.\n\n\
Example usage:\n  discussion-forge run --config experiment.yaml\n  \
discussion-forge export --conversations output/discussions --annotations output/annotations --output dataset.parquet"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Also write logs (without colors) to this file.
    #[arg(long, global = true, env = "DISCUSSION_FORGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run every action enabled in the config, in order.
    Run(ConfigArgs),

    /// Generate discussions only.
    #[command(alias = "disc")]
    Discussions(ConfigArgs),

    /// Annotate existing discussions only.
    #[command(alias = "annot")]
    Annotations(ConfigArgs),

    /// Join transcripts with annotations and write a Parquet dataset.
    Export(ExportArgs),
}

/// Arguments shared by config-driven commands.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Path to the YAML experiment config.
    #[arg(short, long, env = "DISCUSSION_FORGE_CONFIG")]
    pub config: PathBuf,

    /// Print a JSON summary to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `discussion-forge export`.
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Root directory of transcript JSON files.
    #[arg(long)]
    pub conversations: PathBuf,

    /// Root directory of annotation JSON files.
    #[arg(long)]
    pub annotations: PathBuf,

    /// Output Parquet file.
    #[arg(short, long, default_value = "dataset.parquet")]
    pub output: PathBuf,

    /// Print a JSON summary to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// What a config-driven invocation did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub discussions: Option<ExperimentReport>,
    pub annotations: Option<ExperimentReport>,
    pub export: Option<ExportSummary>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_config_command(args, None).await,
        Commands::Discussions(args) => {
            let only = ActionsConfig {
                generate_discussions: true,
                ..Default::default()
            };
            run_config_command(args, Some(only)).await
        }
        Commands::Annotations(args) => {
            let only = ActionsConfig {
                generate_annotations: true,
                ..Default::default()
            };
            run_config_command(args, Some(only)).await
        }
        Commands::Export(args) => run_export_command(args),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_config_command(args: ConfigArgs, actions: Option<ActionsConfig>) -> anyhow::Result<()> {
    let mut config = ExperimentConfig::from_file(&args.config)?;
    if let Some(actions) = actions {
        config.actions = actions;
    }

    let summary = run_experiment(&config, None).await?;
    print_summary(&summary, args.json)
}

fn run_export_command(args: ExportArgs) -> anyhow::Result<()> {
    let summary = export_dataset(&args.conversations, &args.annotations, &args.output)?;
    let summary = RunSummary {
        export: Some(summary),
        ..Default::default()
    };
    print_summary(&summary, args.json)
}

/// Execute the actions enabled in `config`.
///
/// `model` overrides the backend described by the config; when `None` the
/// model is built from `config.model` (only if an action needs it).
pub async fn run_experiment(
    config: &ExperimentConfig,
    model: Option<Arc<LanguageModel>>,
) -> anyhow::Result<RunSummary> {
    config.validate()?;
    let actions = &config.actions;
    let mut summary = RunSummary::default();

    if !actions.any() {
        warn!("All actions are disabled for this run, nothing to do");
        return Ok(summary);
    }
    if !actions.generate_discussions {
        warn!("Synthetic discussion generation disabled");
    }
    if !actions.generate_annotations {
        warn!("Synthetic annotation disabled");
    }
    if !actions.export_dataset {
        warn!("Dataset export disabled");
    }

    let needs_model = actions.generate_discussions || actions.generate_annotations;
    let model = match (model, needs_model) {
        (Some(model), _) => Some(model),
        (None, true) => Some(build_model(&config.model)?),
        (None, false) => None,
    };

    if let (true, Some(discussions), Some(model)) =
        (actions.generate_discussions, &config.discussions, &model)
    {
        info!("Starting synthetic discussion experiments");
        let experiment = DiscussionExperiment::from_config(discussions, model.clone())?;
        let report = experiment.run(&discussions.output_dir).await?;
        summary.discussions = Some(report);
    }

    if let (true, Some(annotations), Some(model)) =
        (actions.generate_annotations, &config.annotations, &model)
    {
        let input_dir = config
            .annotation_input_dir()
            .ok_or_else(|| anyhow::anyhow!("No transcript directory to annotate"))?;
        info!(input_dir = %input_dir.display(), "Starting synthetic annotation");
        let experiment = AnnotationExperiment::from_config(annotations, model.clone())?;
        let report = experiment.run(&input_dir, &annotations.output_dir).await?;
        summary.annotations = Some(report);
    }

    if let (true, Some(export)) = (actions.export_dataset, &config.export) {
        let result = export_dataset(
            &export.conversations_dir,
            &export.annotations_dir,
            &export.output_path,
        )?;
        info!(path = %result.output_path, rows = result.rows, "Dataset exported");
        summary.export = Some(result);
    }

    Ok(summary)
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        let output = serde_json::to_string_pretty(summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize summary JSON: {}", e))?;
        println!("{}", output);
        return Ok(());
    }

    if let Some(report) = &summary.discussions {
        print_report("Discussions", report);
    }
    if let Some(report) = &summary.annotations {
        print_report("Annotations", report);
    }
    if let Some(export) = &summary.export {
        println!(
            "Export: {} rows ({} annotated) from {} conversations -> {}",
            export.rows, export.annotated_rows, export.conversations, export.output_path
        );
    }
    Ok(())
}

fn print_report(label: &str, report: &ExperimentReport) {
    println!(
        "{}: {}/{} succeeded, {} failed",
        label, report.succeeded, report.total, report.failed
    );
    if let Some(dir) = report.outputs.first().and_then(|p| p.parent()) {
        println!("  written to {}", dir.display());
    }
}

// ============================================================================
// Tests
// ============================================================================
