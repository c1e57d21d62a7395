//! Typed error hierarchy for the milestone pipeline.
//!
//! Two top-level enums cover the two failure surfaces:
//! - `AgentError` — failures of a single call to the external agent service
//! - `PipelineError` — artifact, checkpoint and controller failures
//!
//! A failing verification is not an error: it is a `VerificationStatus` with
//! `passed == false` and drives the fix/retry loop instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::artifacts::Scope;
use crate::phases::PhaseKind;

/// Errors from one Agent Query Client call.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent exited with non-zero code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Agent reported an error: {0}")]
    Reported(String),

    #[error("Agent call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Agent stream error: {0}")]
    Stream(String),
}

/// Errors from the pipeline controller, phase functions and artifact store.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Required artifact '{filename}' is missing ({scope})")]
    ArtifactMissing { scope: Scope, filename: String },

    #[error("Agent query failed during {phase} phase: {source}")]
    AgentQuery {
        phase: PhaseKind,
        #[source]
        source: AgentError,
    },

    #[error("Milestone {milestone} failed verification after {attempts} attempt(s)")]
    RetryExhausted { milestone: usize, attempts: u32 },

    #[error("Invalid milestone manifest: {0}")]
    InvalidManifest(String),

    #[error("Another pipeline run holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the expected "artifact not there" case.
    pub fn is_artifact_missing(&self) -> bool {
        matches!(self, PipelineError::ArtifactMissing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_missing_names_scope_and_file() {
        let err = PipelineError::ArtifactMissing {
            scope: Scope::Milestone(2),
            filename: "plan.md".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("plan.md"), "{msg}");
        assert!(msg.contains("milestone 02"), "{msg}");
        assert!(err.is_artifact_missing());
    }

    #[test]
    fn agent_query_carries_phase_and_source() {
        let err = PipelineError::AgentQuery {
            phase: PhaseKind::Verify,
            source: AgentError::Timeout { secs: 30 },
        };
        assert!(err.to_string().contains("verify"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("30s"));
    }

    #[test]
    fn retry_exhausted_is_matchable() {
        let err = PipelineError::RetryExhausted {
            milestone: 1,
            attempts: 3,
        };
        match &err {
            PipelineError::RetryExhausted {
                milestone,
                attempts,
            } => {
                assert_eq!(*milestone, 1);
                assert_eq!(*attempts, 3);
            }
            _ => panic!("Expected RetryExhausted"),
        }
        assert!(!err.is_artifact_missing());
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = PipelineError::io(
            "/tmp/x.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match err {
            PipelineError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("/tmp/x.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AgentError::Reported("x".into()));
        assert_std_error(&PipelineError::InvalidManifest("x".into()));
    }
}
