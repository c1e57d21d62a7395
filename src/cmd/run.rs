//! Milestone pipeline execution: `waypoint run`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use super::super::Cli;

pub struct RunArgs {
    pub requirements: PathBuf,
    pub model: Option<String>,
    pub max_retries: Option<u32>,
    pub start_milestone: Option<usize>,
    pub retry_failed: bool,
    pub reparse: bool,
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: RunArgs) -> Result<()> {
    use waypoint::agent::ClaudeClient;
    use waypoint::artifacts::{self, FsArtifactStore};
    use waypoint::config::{CliOverrides, Config};
    use waypoint::errors::PipelineError;
    use waypoint::events::EventLog;
    use waypoint::notify;
    use waypoint::pipeline::{Pipeline, PipelineOptions, PipelineOutcome};
    use waypoint::state::MilestoneStatus;
    use waypoint::tracker::GitCommitter;

    let config = Config::new(
        project_dir,
        CliOverrides {
            model: args.model,
            max_retries: args.max_retries,
            verbose: cli.verbose,
        },
    )?;
    config.ensure_directories()?;
    let config = Arc::new(config);

    let store = Arc::new(FsArtifactStore::new(config.pipeline_dir.clone()));
    let events = Arc::new(
        EventLog::new()
            .with_stdout()
            .with_file(&config.pipeline_dir.join(artifacts::EVENTS))?,
    );
    let agent = Arc::new(ClaudeClient::new(&config));

    let mut pipeline = Pipeline::new(config.clone(), store, agent, events.clone());
    if let Some(notifier) = notify::from_config(&config.notify) {
        pipeline = pipeline.with_notifier(Arc::new(notifier));
    }
    if config.git.auto_commit {
        pipeline = pipeline.with_committer(Arc::new(GitCommitter::new(
            config.project_dir.clone(),
            &config.git,
        )));
    }

    tracing::info!(
        run_id = %events.run_id(),
        project = %config.project_name,
        model = %config.model,
        max_retries = config.max_retries,
        "starting pipeline"
    );

    let options = PipelineOptions {
        requirements: args.requirements,
        start_milestone: args.start_milestone,
        retry_failed: args.retry_failed,
        reparse: args.reparse,
    };
    let summary = pipeline.execute(&options).await?;

    let state = &summary.state;
    eprintln!();
    for ms in &state.milestones {
        let styled = console::style(ms.status.to_string());
        let status = match ms.status {
            MilestoneStatus::Completed => styled.green(),
            MilestoneStatus::Failed => styled.red(),
            _ => styled.dim(),
        };
        eprintln!(
            "  {:02}  {:<12} attempts {}  ${:.2}",
            ms.id, status, ms.attempts, ms.cost
        );
    }
    eprintln!(
        "  {} {}/{} milestones, ${:.2} total",
        console::style("Done:").bold(),
        state.completed_count(),
        state.milestones.len(),
        state.total_cost
    );
    eprintln!();

    match summary.outcome {
        PipelineOutcome::Completed => Ok(()),
        PipelineOutcome::Halted { milestone } => {
            let attempts = state.milestone(milestone).map(|m| m.attempts).unwrap_or(0);
            Err(PipelineError::RetryExhausted {
                milestone,
                attempts,
            }
            .into())
        }
    }
}
