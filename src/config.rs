use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline_config::{GitSection, NotifySection, WaypointToml};

pub const PIPELINE_DIR: &str = ".waypoint";

/// Values supplied on the command line. `None` keeps the file/env value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub max_retries: Option<u32>,
    pub verbose: bool,
}

/// Runtime configuration for waypoint.
///
/// Resolved once per invocation from `waypoint.toml`, the environment and
/// the CLI, then shared read-only by the controller and phases.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub project_name: String,
    pub pipeline_dir: PathBuf,
    pub log_dir: PathBuf,
    pub claude_cmd: String,
    pub skip_permissions: bool,
    pub session_continuity: bool,
    pub agent_timeout: Duration,
    pub model: String,
    pub max_retries: u32,
    pub notify: NotifySection,
    pub git: GitSection,
    pub verbose: bool,
}

impl Config {
    /// Load `waypoint.toml` for a project and apply env and CLI layers.
    pub fn new(project_dir: PathBuf, overrides: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let mut toml = WaypointToml::load_or_default(&project_dir.join(PIPELINE_DIR))?;
        toml.apply_env();
        for warning in toml.validate() {
            tracing::warn!("waypoint.toml: {}", warning);
        }
        Self::from_toml(project_dir, toml, overrides)
    }

    /// Build a config from already-layered file values plus CLI overrides.
    pub fn from_toml(
        project_dir: PathBuf,
        toml: WaypointToml,
        overrides: CliOverrides,
    ) -> Result<Self> {
        let max_retries = overrides.max_retries.unwrap_or(toml.defaults.max_retries);
        if max_retries == 0 {
            bail!("max_retries must be at least 1");
        }

        let project_name = toml
            .project
            .name
            .clone()
            .unwrap_or_else(|| dir_name(&project_dir));
        let pipeline_dir = project_dir.join(PIPELINE_DIR);
        let log_dir = pipeline_dir.join("logs");

        Ok(Self {
            claude_cmd: toml.claude_cmd(),
            skip_permissions: toml.agent.skip_permissions,
            session_continuity: toml.agent.session_continuity,
            agent_timeout: Duration::from_secs(toml.agent.timeout_secs),
            model: overrides.model.unwrap_or(toml.defaults.model),
            max_retries,
            notify: toml.notify,
            git: toml.git,
            verbose: overrides.verbose,
            project_dir,
            project_name,
            pipeline_dir,
            log_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.pipeline_dir.join(crate::pipeline_config::CONFIG_FILE)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.pipeline_dir)
            .context("Failed to create pipeline directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}
