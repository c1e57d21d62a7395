//! Agent Query Client: the seam between the pipeline and the external
//! code-generation service.
//!
//! Every phase issues exactly one `AgentQuery` and gets back a `PhaseResult`.
//! The production implementation is [`ClaudeClient`]; tests inject a
//! scripted double.

pub mod claude;
#[cfg(test)]
pub mod scripted;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::phases::PhaseKind;

pub use claude::ClaudeClient;

/// Tools available to phases that only read and search.
pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "WebSearch", "WebFetch"];

/// Tools available to phases that change the project.
pub const WRITE_TOOLS: &[&str] = &[
    "Read", "Write", "Edit", "MultiEdit", "Glob", "Grep", "Bash", "Task", "TodoWrite",
];

pub fn tool_list(tools: &[&str]) -> Vec<String> {
    tools.iter().map(|t| t.to_string()).collect()
}

/// A named sub-worker persona with its own tool allow-list.
#[derive(Debug, Clone, PartialEq)]
pub struct SubAgent {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tools: Vec<String>,
}

/// One request to the agent service.
#[derive(Debug, Clone)]
pub struct AgentQuery {
    /// Phase issuing the query (used for log naming and test scripting)
    pub phase: PhaseKind,
    /// Milestone index, `None` for pipeline-scoped phases
    pub milestone: Option<usize>,
    /// Attempt number within the execute/verify loop, if any
    pub attempt: Option<u32>,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub cwd: PathBuf,
    /// Continuation token from an earlier call
    pub resume: Option<String>,
    pub model: String,
    pub agents: Vec<SubAgent>,
}

impl AgentQuery {
    /// Stable label for logs, e.g. `m02-fix-a3` or `pipeline-parse`.
    pub fn label(&self) -> String {
        let scope = match self.milestone {
            Some(index) => format!("m{:02}", index),
            None => "pipeline".to_string(),
        };
        match self.attempt {
            Some(attempt) => format!("{}-{}-a{}", scope, self.phase, attempt),
            None => format!("{}-{}", scope, self.phase),
        }
    }
}

/// The uniform result of one agent call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    /// Opaque continuation token for resuming the same conversation
    pub session_id: Option<String>,
    /// Reported cost in USD
    pub cost: f64,
    pub duration_ms: u64,
    pub turns: u32,
    /// Final text produced by the agent
    pub output: String,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn query(&self, query: AgentQuery) -> Result<PhaseResult, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(milestone: Option<usize>, attempt: Option<u32>, phase: PhaseKind) -> AgentQuery {
        AgentQuery {
            phase,
            milestone,
            attempt,
            prompt: String::new(),
            allowed_tools: vec![],
            cwd: PathBuf::from("."),
            resume: None,
            model: "sonnet".to_string(),
            agents: vec![],
        }
    }

    #[test]
    fn test_label_formats() {
        assert_eq!(query(None, None, PhaseKind::Parse).label(), "pipeline-parse");
        assert_eq!(
            query(Some(2), Some(3), PhaseKind::Fix).label(),
            "m02-fix-a3"
        );
        assert_eq!(
            query(Some(0), None, PhaseKind::Research).label(),
            "m00-research"
        );
    }

    #[test]
    fn test_read_only_tools_cannot_write() {
        let tools = tool_list(READ_ONLY_TOOLS);
        assert!(!tools.iter().any(|t| t == "Write" || t == "Edit" || t == "Bash"));
        assert!(tool_list(WRITE_TOOLS).iter().any(|t| t == "Bash"));
    }
}
