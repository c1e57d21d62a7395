//! VCS side effects after a milestone completes.
//!
//! Commit failures never fail a milestone; the controller logs them and moves
//! on.

pub mod git;

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::milestone::Milestone;
use crate::pipeline_config::GitSection;

pub use git::GitTracker;

#[async_trait]
pub trait Committer: Send + Sync {
    /// Commit the project state for a completed milestone. Returns the
    /// commit SHA, or `None` if there was nothing to commit.
    async fn commit_milestone(&self, milestone: &Milestone) -> Result<Option<String>>;
}

pub fn commit_message(milestone: &Milestone) -> String {
    let mut message = format!(
        "[waypoint] milestone {:02}: {}",
        milestone.id, milestone.name
    );
    if !milestone.version.is_empty() {
        message.push_str(&format!(" ({})", milestone.version));
    }
    if !milestone.features.is_empty() {
        message.push_str("\n\n");
        for feature in &milestone.features {
            message.push_str(&format!("- {}\n", feature));
        }
    }
    message
}

/// Commits with git2 and optionally pushes with the `git` CLI.
pub struct GitCommitter {
    project_dir: PathBuf,
    push: bool,
    remote: String,
}

impl GitCommitter {
    pub fn new(project_dir: PathBuf, settings: &GitSection) -> Self {
        Self {
            project_dir,
            push: settings.push,
            remote: settings.remote.clone(),
        }
    }

    async fn push(&self) -> Result<()> {
        let output = tokio::process::Command::new("git")
            .args(["push", &self.remote, "HEAD"])
            .current_dir(&self.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run git push")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to push to {}: {}", self.remote, stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl Committer for GitCommitter {
    async fn commit_milestone(&self, milestone: &Milestone) -> Result<Option<String>> {
        let sha = {
            let tracker = GitTracker::new(&self.project_dir)?;
            tracker.commit_all(&commit_message(milestone))?
        };

        match sha {
            Some(ref sha) => info!(milestone = milestone.id, %sha, "milestone committed"),
            None => {
                debug!(milestone = milestone.id, "nothing to commit");
                return Ok(None);
            }
        }

        if self.push {
            self.push().await?;
            info!(remote = %self.remote, "pushed milestone commit");
        }
        Ok(sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use tempfile::tempdir;

    fn milestone() -> Milestone {
        Milestone {
            id: 3,
            version: "0.4.0".to_string(),
            name: "Sync".to_string(),
            features: vec!["offline queue".to_string()],
            tests: vec![],
            docs: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn test_commit_message_format() {
        let msg = commit_message(&milestone());
        assert!(msg.starts_with("[waypoint] milestone 03: Sync (0.4.0)"));
        assert!(msg.contains("- offline queue"));
    }

    #[tokio::test]
    async fn test_git_committer_commits_then_reports_nothing() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn f() {}").unwrap();

        let committer = GitCommitter::new(dir.path().to_path_buf(), &GitSection::default());
        let sha = committer.commit_milestone(&milestone()).await.unwrap();
        assert!(sha.is_some());

        let again = committer.commit_milestone(&milestone()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_git_committer_outside_repo_errors() {
        let dir = tempdir().unwrap();
        let committer = GitCommitter::new(dir.path().to_path_buf(), &GitSection::default());
        assert!(committer.commit_milestone(&milestone()).await.is_err());
    }
}
