//! File-level configuration for waypoint.
//!
//! Reads `.waypoint/waypoint.toml`. Values are layered file → environment →
//! CLI; this module covers the first two layers and [`crate::config::Config`]
//! applies the CLI on top.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "todo-service"
//!
//! [defaults]
//! model = "sonnet"
//! max_retries = 3
//!
//! [agent]
//! claude_cmd = "claude"
//! skip_permissions = true
//! session_continuity = true
//! timeout_secs = 3600
//!
//! [notify]
//! enabled = true
//! server = "https://ntfy.sh"
//! topic = "my-builds"
//!
//! [git]
//! auto_commit = true
//! push = false
//! remote = "origin"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "waypoint.toml";

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
}

/// Defaults for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Model identifier passed to the agent for every phase
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on execute/verify attempts per milestone
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_retries: default_max_retries(),
        }
    }
}

/// Claude CLI integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Claude CLI command (default: "claude")
    #[serde(default)]
    pub claude_cmd: Option<String>,
    /// Whether to skip permission prompts for Claude CLI
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
    /// Resume the execute session with `--resume` when running Fix (default: true)
    #[serde(default = "default_true")]
    pub session_continuity: bool,
    /// Wall-clock limit for a single agent call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            skip_permissions: true,
            session_continuity: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Push notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ntfy_server")]
    pub server: String,
    #[serde(default)]
    pub topic: Option<String>,
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            enabled: false,
            server: default_ntfy_server(),
            topic: None,
        }
    }
}

/// Version-control side effects after a milestone completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            auto_commit: true,
            push: false,
            remote: default_remote(),
        }
    }
}

/// The complete waypoint.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub git: GitSection,
}

impl WaypointToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse waypoint.toml")
    }

    /// Load from `<pipeline_dir>/waypoint.toml`, or defaults if absent.
    pub fn load_or_default(pipeline_dir: &Path) -> Result<Self> {
        let config_path = pipeline_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize waypoint.toml")
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cmd) = lookup("CLAUDE_CMD").filter(|v| !v.is_empty()) {
            self.agent.claude_cmd = Some(cmd);
        }
        if let Some(value) = lookup("SKIP_PERMISSIONS") {
            self.agent.skip_permissions = value != "false";
        }
        if let Some(model) = lookup("WAYPOINT_MODEL").filter(|v| !v.is_empty()) {
            self.defaults.model = model;
        }
        if let Some(topic) = lookup("WAYPOINT_NTFY_TOPIC").filter(|v| !v.is_empty()) {
            self.notify.topic = Some(topic);
            self.notify.enabled = true;
        }
    }

    /// The Claude command, falling back to `claude`.
    pub fn claude_cmd(&self) -> String {
        self.agent
            .claude_cmd
            .clone()
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.defaults.max_retries == 0 {
            warnings.push(
                "max_retries is 0: every milestone needs at least one attempt".to_string(),
            );
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("timeout_secs is 0: agent calls would time out immediately".to_string());
        }
        if self.notify.enabled && self.notify.topic.is_none() {
            warnings.push("notify.enabled is set but no topic is configured".to_string());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_empty() {
        let toml = WaypointToml::parse("").unwrap();
        assert_eq!(toml.defaults.model, "sonnet");
        assert_eq!(toml.defaults.max_retries, 3);
        assert!(toml.agent.skip_permissions);
        assert!(toml.agent.session_continuity);
        assert!(!toml.notify.enabled);
        assert!(toml.git.auto_commit);
        assert!(!toml.git.push);
        assert_eq!(toml.claude_cmd(), "claude");
    }

    #[test]
    fn test_parse_full() {
        let content = r#"
[project]
name = "todo"

[defaults]
model = "opus"
max_retries = 5

[agent]
claude_cmd = "/opt/claude"
skip_permissions = false
session_continuity = false
timeout_secs = 120

[notify]
enabled = true
server = "https://push.example.com"
topic = "builds"

[git]
auto_commit = false
push = true
remote = "upstream"
"#;
        let toml = WaypointToml::parse(content).unwrap();
        assert_eq!(toml.project.name.as_deref(), Some("todo"));
        assert_eq!(toml.defaults.model, "opus");
        assert_eq!(toml.defaults.max_retries, 5);
        assert_eq!(toml.claude_cmd(), "/opt/claude");
        assert!(!toml.agent.skip_permissions);
        assert!(!toml.agent.session_continuity);
        assert_eq!(toml.agent.timeout_secs, 120);
        assert_eq!(toml.notify.server, "https://push.example.com");
        assert_eq!(toml.notify.topic.as_deref(), Some("builds"));
        assert!(!toml.git.auto_commit);
        assert!(toml.git.push);
        assert_eq!(toml.git.remote, "upstream");
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = WaypointToml::parse("[defaults\nmodel = 1").unwrap_err();
        assert!(err.to_string().contains("waypoint.toml"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut toml = WaypointToml::parse(
            r#"
[defaults]
model = "opus"

[agent]
claude_cmd = "file-claude"
"#,
        )
        .unwrap();
        toml.apply_overrides(lookup(&[
            ("CLAUDE_CMD", "env-claude"),
            ("SKIP_PERMISSIONS", "false"),
            ("WAYPOINT_MODEL", "haiku"),
            ("WAYPOINT_NTFY_TOPIC", "ci"),
        ]));
        assert_eq!(toml.claude_cmd(), "env-claude");
        assert!(!toml.agent.skip_permissions);
        assert_eq!(toml.defaults.model, "haiku");
        assert_eq!(toml.notify.topic.as_deref(), Some("ci"));
        assert!(toml.notify.enabled);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut toml = WaypointToml::default();
        toml.apply_overrides(lookup(&[("CLAUDE_CMD", ""), ("WAYPOINT_MODEL", "")]));
        assert_eq!(toml.claude_cmd(), "claude");
        assert_eq!(toml.defaults.model, "sonnet");
    }

    #[test]
    fn test_validate_warnings() {
        let mut toml = WaypointToml::default();
        toml.defaults.max_retries = 0;
        toml.notify.enabled = true;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("max_retries"));
        assert!(warnings[1].contains("topic"));
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".waypoint").join(CONFIG_FILE);

        let mut toml = WaypointToml::default();
        toml.project.name = Some("demo".to_string());
        toml.defaults.max_retries = 7;
        toml.save(&path).unwrap();

        let loaded = WaypointToml::load(&path).unwrap();
        assert_eq!(loaded.project.name.as_deref(), Some("demo"));
        assert_eq!(loaded.defaults.max_retries, 7);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = WaypointToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.defaults.max_retries, 3);
    }

    #[test]
    fn test_load_or_default_with_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[defaults]\nmax_retries = 2\n",
        )
        .unwrap();
        let toml = WaypointToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.defaults.max_retries, 2);
    }
}
