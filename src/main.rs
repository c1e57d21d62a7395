use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod cmd;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Checkpointed milestone build pipeline driven by Claude")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run (or resume) the pipeline for a requirements document
    Run {
        /// Path to the requirements document (markdown)
        requirements: PathBuf,

        /// Model passed to every agent call. Overrides waypoint.toml.
        #[arg(long)]
        model: Option<String>,

        /// Execute/Fix attempts per milestone before halting
        #[arg(long)]
        max_retries: Option<u32>,

        /// Begin at this milestone index instead of the checkpoint's
        #[arg(long)]
        start_milestone: Option<usize>,

        /// Give milestones that failed in an earlier run a fresh retry budget
        #[arg(long)]
        retry_failed: bool,

        /// Discard the manifest, checkpoint and milestone artifacts and parse again
        #[arg(long)]
        reparse: bool,
    },
    /// Show the manifest and checkpoint summary
    Status,
    /// Remove the checkpoint
    Reset {
        #[arg(long)]
        force: bool,

        /// Also remove the manifest and every milestone artifact
        #[arg(long)]
        all: bool,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default waypoint.toml file
    Init,
}

/// Human logs go to stderr (stdout carries the event stream). When a log
/// directory is given, JSON logs are also written to a daily rolling file.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "waypoint=debug" } else { "waypoint=info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "waypoint.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = match cli.command {
        Commands::Run { .. } => Some(
            project_dir
                .join(waypoint::config::PIPELINE_DIR)
                .join("logs"),
        ),
        _ => None,
    };
    let _guard = init_logging(cli.verbose, log_dir.as_deref());

    match &cli.command {
        Commands::Run {
            requirements,
            model,
            max_retries,
            start_milestone,
            retry_failed,
            reparse,
        } => {
            let args = cmd::RunArgs {
                requirements: requirements.clone(),
                model: model.clone(),
                max_retries: *max_retries,
                start_milestone: *start_milestone,
                retry_failed: *retry_failed,
                reparse: *reparse,
            };
            cmd::cmd_run(&cli, project_dir, args).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Reset { force, all } => cmd::cmd_reset(&project_dir, *force, *all)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
