//! Deterministic `AgentClient` for tests.
//!
//! Each phase has a queue of scripted responses; when a queue is empty the
//! agent falls back to a canned successful output for that phase. Outputs
//! carry the artifact content so the phase functions materialize files
//! exactly as they would from a real worker that printed instead of writing.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AgentClient, AgentQuery, PhaseResult};
use crate::errors::AgentError;
use crate::phases::PhaseKind;

/// What the scripted agent saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub phase: PhaseKind,
    pub milestone: Option<usize>,
    pub attempt: Option<u32>,
    pub resume: Option<String>,
    pub allowed_tools: Vec<String>,
    pub agents: Vec<String>,
    pub prompt: String,
}

pub struct ScriptedAgent {
    responses: Mutex<HashMap<PhaseKind, VecDeque<Result<PhaseResult, AgentError>>>>,
    /// Files the worker writes itself on its next call for a phase
    writes: Mutex<HashMap<PhaseKind, VecDeque<(PathBuf, String)>>>,
    calls: Mutex<Vec<RecordedCall>>,
    cost_per_call: f64,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            cost_per_call: 0.25,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn push(&self, phase: PhaseKind, response: Result<PhaseResult, AgentError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back(response);
    }

    pub fn push_output(&self, phase: PhaseKind, output: impl Into<String>) {
        let result = PhaseResult {
            output: output.into(),
            cost: self.cost_per_call,
            ..Default::default()
        };
        self.push(phase, Ok(result));
    }

    pub fn push_error(&self, phase: PhaseKind, error: AgentError) {
        self.push(phase, Err(error));
    }

    /// Have the next `phase` call write `content` to `path` before answering.
    pub fn write_on(&self, phase: PhaseKind, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.writes
            .lock()
            .unwrap()
            .entry(phase)
            .or_default()
            .push_back((path.into(), content.into()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, phase: PhaseKind) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.phase == phase)
            .collect()
    }

    pub fn count(&self, phase: PhaseKind) -> usize {
        self.calls_for(phase).len()
    }

    /// Calls that touched a given milestone.
    pub fn calls_for_milestone(&self, milestone: usize) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.milestone == Some(milestone))
            .collect()
    }

    /// Total cost of every successful call so far.
    pub fn total_cost(&self) -> f64 {
        self.calls().len() as f64 * self.cost_per_call
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn query(&self, query: AgentQuery) -> Result<PhaseResult, AgentError> {
        let write = self
            .writes
            .lock()
            .unwrap()
            .get_mut(&query.phase)
            .and_then(|queue| queue.pop_front());
        if let Some((path, content)) = write {
            std::fs::write(&path, content).unwrap();
        }

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&query.phase)
            .and_then(|queue| queue.pop_front());

        let mut result = match scripted {
            Some(Err(e)) => return Err(e),
            Some(Ok(result)) => result,
            None => PhaseResult {
                output: default_output(query.phase),
                cost: self.cost_per_call,
                ..Default::default()
            },
        };
        if result.session_id.is_none() {
            result.session_id = Some(format!("session-{}", query.label()));
        }

        self.calls.lock().unwrap().push(RecordedCall {
            phase: query.phase,
            milestone: query.milestone,
            attempt: query.attempt,
            resume: query.resume.clone(),
            allowed_tools: query.allowed_tools.clone(),
            agents: query.agents.iter().map(|a| a.name.clone()).collect(),
            prompt: query.prompt,
        });
        Ok(result)
    }
}

/// Canned successful output for a phase.
pub fn default_output(phase: PhaseKind) -> String {
    match phase {
        PhaseKind::Parse => manifest_json(&[&[], &[0]]),
        PhaseKind::Research => "# Research\n\nExisting code uses a layered layout.\n".to_string(),
        PhaseKind::Architect => r#"# Plan

Build the milestone in two steps.

{"steps": [
  {"id": 1, "title": "Scaffold", "description": "Create the module", "files": ["src/lib.rs"], "validation": ["cargo build"]},
  {"id": 2, "title": "Tests", "description": "Add unit tests", "files": ["src/lib.rs"], "validation": ["cargo test"]}
]}
"#
        .to_string(),
        PhaseKind::Execute => "Implemented both steps; build and tests pass.\n".to_string(),
        PhaseKind::Fix => "Fixed the failing checks.\n".to_string(),
        PhaseKind::Verify => verify_output(&[]),
        PhaseKind::Report => "# Milestone Report\n\nAll planned features delivered.\n".to_string(),
        PhaseKind::FinalReport => "# Final Report\n\nPipeline finished.\n".to_string(),
    }
}

/// A Parse output with one milestone per entry of `deps`.
pub fn manifest_json(deps: &[&[usize]]) -> String {
    let milestones: Vec<serde_json::Value> = deps
        .iter()
        .enumerate()
        .map(|(id, deps)| {
            serde_json::json!({
                "id": id,
                "version": format!("0.{}.0", id + 1),
                "name": format!("Milestone {}", id),
                "features": [format!("feature {}", id)],
                "tests": [format!("test {}", id)],
                "docs": [],
                "dependencies": deps,
            })
        })
        .collect();
    serde_json::json!({
        "project": {"name": "demo", "language": "rust"},
        "milestones": milestones,
    })
    .to_string()
}

/// A Verify output; passes when `failing` is empty.
pub fn verify_output(failing: &[&str]) -> String {
    let mut checks = vec![serde_json::json!({"name": "build", "passed": true, "output": "ok"})];
    for name in failing {
        checks.push(serde_json::json!({
            "name": name,
            "passed": false,
            "output": format!("{name} failed"),
        }));
    }
    let status = serde_json::json!({
        "passed": failing.is_empty(),
        "checks": checks,
        "failures": failing,
    });
    format!("Verification finished.\n\n{}\n", status)
}
