//! Phase Functions: one agent call per phase, plus artifact materialization.
//!
//! Every phase checks its required inputs first (`ArtifactMissing` if any is
//! absent), issues exactly one `AgentQuery`, then makes sure its outputs
//! exist. The worker normally writes outputs itself; when it only printed
//! them, the phase writes them from the final answer.

pub mod prompts;
pub mod steps;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{
    AgentClient, AgentQuery, PhaseResult, READ_ONLY_TOOLS, SubAgent, WRITE_TOOLS, tool_list,
};
use crate::artifacts::{self, ArtifactStore, Scope, read_json, write_json};
use crate::config::Config;
use crate::errors::PipelineError;
use crate::milestone::{Manifest, Milestone};
use crate::util::extract_json;
use crate::verification::VerificationStatus;

use steps::{StepsFile, render_validation_md};

/// The named steps of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Parse,
    Research,
    Architect,
    Execute,
    Fix,
    Verify,
    Report,
    FinalReport,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseKind::Parse => "parse",
            PhaseKind::Research => "research",
            PhaseKind::Architect => "architect",
            PhaseKind::Execute => "execute",
            PhaseKind::Fix => "fix",
            PhaseKind::Verify => "verify",
            PhaseKind::Report => "report",
            PhaseKind::FinalReport => "final_report",
        };
        write!(f, "{}", name)
    }
}

impl PhaseKind {
    /// Artifacts the phase must leave behind.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            PhaseKind::Parse => &[artifacts::MANIFEST],
            PhaseKind::Research => &[artifacts::RESEARCH],
            PhaseKind::Architect => &[artifacts::PLAN, artifacts::STEPS, artifacts::VALIDATION],
            PhaseKind::Execute | PhaseKind::Fix => &[artifacts::EXECUTION_RESULTS],
            PhaseKind::Verify => &[
                artifacts::VERIFICATION_RESULTS,
                artifacts::VERIFICATION_STATUS,
            ],
            PhaseKind::Report | PhaseKind::FinalReport => &[artifacts::REPORT],
        }
    }

    /// Milestone artifacts that must exist before the phase may run.
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            PhaseKind::Architect => &[artifacts::RESEARCH],
            PhaseKind::Execute => &[artifacts::PLAN, artifacts::STEPS],
            PhaseKind::Fix => &[
                artifacts::VERIFICATION_STATUS,
                artifacts::VERIFICATION_RESULTS,
                artifacts::PLAN,
            ],
            _ => &[],
        }
    }

    /// Tools the worker may use during this phase.
    pub fn allowed_tools(&self) -> Vec<String> {
        match self {
            PhaseKind::Research => {
                let mut tools = tool_list(READ_ONLY_TOOLS);
                tools.push("Task".to_string());
                tools
            }
            PhaseKind::Report | PhaseKind::FinalReport => tool_list(READ_ONLY_TOOLS),
            PhaseKind::Parse => tool_list(&["Read", "Write", "Glob", "Grep"]),
            _ => tool_list(WRITE_TOOLS),
        }
    }

    /// Read-only phases cannot write files; their final answer is the artifact.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            PhaseKind::Research | PhaseKind::Report | PhaseKind::FinalReport
        )
    }
}

/// Phase function dispatcher bound to one project.
#[derive(Clone)]
pub struct Phases {
    config: Arc<Config>,
    store: Arc<dyn ArtifactStore>,
    agent: Arc<dyn AgentClient>,
}

impl Phases {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ArtifactStore>,
        agent: Arc<dyn AgentClient>,
    ) -> Self {
        Self {
            config,
            store,
            agent,
        }
    }

    /// Split the requirements document into a validated, hash-stamped manifest.
    pub async fn parse(
        &self,
        requirements_path: &Path,
    ) -> Result<(Manifest, PhaseResult), PipelineError> {
        let requirements = std::fs::read_to_string(requirements_path)
            .map_err(|source| PipelineError::io(requirements_path, source))?;
        if requirements.trim().is_empty() {
            return Err(PipelineError::InvalidManifest(format!(
                "requirements document {} is empty",
                requirements_path.display()
            )));
        }

        self.store.ensure_scope(Scope::Pipeline)?;
        let manifest_path = self.store.path(Scope::Pipeline, artifacts::MANIFEST);
        let prompt = prompts::parse_prompt(&requirements, &manifest_path);
        let result = self
            .call(PhaseKind::Parse, None, None, prompt, None, vec![])
            .await?;

        let mut manifest = match self.written_manifest()? {
            Some(written) => written,
            None => Manifest::from_output(&result.output)?,
        };
        manifest.stamp_requirements(&requirements);
        write_json(
            self.store.as_ref(),
            Scope::Pipeline,
            artifacts::MANIFEST,
            &manifest,
        )?;

        info!(
            milestones = manifest.len(),
            project = %manifest.project.name,
            "manifest written"
        );
        Ok((manifest, result))
    }

    pub async fn research(
        &self,
        manifest: &Manifest,
        index: usize,
    ) -> Result<PhaseResult, PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.store.ensure_scope(scope)?;

        let prompt =
            prompts::research_prompt(manifest, milestone, &self.path(scope, artifacts::RESEARCH));
        let researcher = SubAgent {
            name: "researcher".to_string(),
            description: "Investigates code and libraries relevant to a milestone".to_string(),
            prompt: prompts::RESEARCHER_PERSONA.to_string(),
            tools: tool_list(READ_ONLY_TOOLS),
        };
        let result = self
            .call(
                PhaseKind::Research,
                Some(index),
                None,
                prompt,
                None,
                vec![researcher],
            )
            .await?;

        self.write_answer(scope, artifacts::RESEARCH, &result)?;
        Ok(result)
    }

    pub async fn architect(
        &self,
        manifest: &Manifest,
        index: usize,
    ) -> Result<PhaseResult, PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.require(scope, PhaseKind::Architect)?;

        // A partial plan from an interrupted run must not mix with the new one
        for output in PhaseKind::Architect.outputs() {
            self.store.remove(scope, output)?;
        }

        let prompt = prompts::architect_prompt(
            milestone,
            &self.path(scope, artifacts::RESEARCH),
            &self.path(scope, artifacts::PLAN),
            &self.path(scope, artifacts::STEPS),
        );
        let result = self
            .call(PhaseKind::Architect, Some(index), None, prompt, None, vec![])
            .await?;

        let steps: StepsFile = self.materialize_json(scope, artifacts::STEPS, &result)?;
        steps.validate().map_err(|reason| {
            PipelineError::Other(anyhow::anyhow!(
                "invalid {} for {}: {}",
                artifacts::STEPS,
                scope,
                reason
            ))
        })?;
        self.materialize_markdown(scope, artifacts::PLAN, &result)?;
        if !self.store.exists(scope, artifacts::VALIDATION) {
            self.store
                .write(scope, artifacts::VALIDATION, &render_validation_md(&steps))?;
        }

        debug!(milestone = index, steps = steps.steps.len(), "plan ready");
        Ok(result)
    }

    pub async fn execute(
        &self,
        manifest: &Manifest,
        index: usize,
        attempt: u32,
    ) -> Result<PhaseResult, PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.require(scope, PhaseKind::Execute)?;

        let prompt = prompts::execute_prompt(
            milestone,
            &self.path(scope, artifacts::PLAN),
            &self.path(scope, artifacts::STEPS),
            &self.path(scope, artifacts::EXECUTION_RESULTS),
        );
        let result = self
            .call(
                PhaseKind::Execute,
                Some(index),
                Some(attempt),
                prompt,
                None,
                vec![],
            )
            .await?;

        self.materialize_markdown(scope, artifacts::EXECUTION_RESULTS, &result)?;
        Ok(result)
    }

    /// Targeted repair driven by the previous attempt's failing checks.
    pub async fn fix(
        &self,
        manifest: &Manifest,
        index: usize,
        attempt: u32,
        resume: Option<String>,
    ) -> Result<PhaseResult, PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.require(scope, PhaseKind::Fix)?;

        let status: VerificationStatus =
            read_json(self.store.as_ref(), scope, artifacts::VERIFICATION_STATUS)?;
        let status = status.normalized(index);
        let before = self.store.read(scope, artifacts::EXECUTION_RESULTS).ok();

        let prompt = prompts::fix_prompt(
            milestone,
            attempt,
            &status,
            &self.path(scope, artifacts::VERIFICATION_RESULTS),
            &self.path(scope, artifacts::PLAN),
            &self.path(scope, artifacts::EXECUTION_RESULTS),
        );
        let result = self
            .call(
                PhaseKind::Fix,
                Some(index),
                Some(attempt),
                prompt,
                resume,
                vec![],
            )
            .await?;

        let after = self.store.read(scope, artifacts::EXECUTION_RESULTS).ok();
        if after.is_none() || after == before {
            let output = result.output.trim();
            if output.is_empty() && after.is_none() {
                return Err(PipelineError::ArtifactMissing {
                    scope,
                    filename: artifacts::EXECUTION_RESULTS.to_string(),
                });
            }
            if !output.is_empty() {
                let mut content = after.unwrap_or_default();
                content.push_str(&format!("\n## Fix attempt {}\n\n{}\n", attempt, output));
                self.store
                    .write(scope, artifacts::EXECUTION_RESULTS, &content)?;
            }
        }
        Ok(result)
    }

    /// Run all checks and return the normalized status.
    pub async fn verify(
        &self,
        manifest: &Manifest,
        index: usize,
        attempt: u32,
    ) -> Result<(VerificationStatus, PhaseResult), PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.store.ensure_scope(scope)?;

        // The previous attempt's status must never be read as this one's
        for output in PhaseKind::Verify.outputs() {
            self.store.remove(scope, output)?;
        }

        let prompt = prompts::verify_prompt(
            milestone,
            index,
            &self.path(scope, artifacts::VALIDATION),
            &self.path(scope, artifacts::VERIFICATION_RESULTS),
            &self.path(scope, artifacts::VERIFICATION_STATUS),
        );
        let verifier = SubAgent {
            name: "verifier".to_string(),
            description: "Runs build, test and lint checks and reports each result".to_string(),
            prompt: prompts::VERIFIER_PERSONA.to_string(),
            tools: tool_list(&["Read", "Glob", "Grep", "Bash"]),
        };
        let result = self
            .call(
                PhaseKind::Verify,
                Some(index),
                Some(attempt),
                prompt,
                None,
                vec![verifier],
            )
            .await?;

        let status: VerificationStatus =
            self.materialize_json(scope, artifacts::VERIFICATION_STATUS, &result)?;
        let status = status.normalized(index);
        write_json(
            self.store.as_ref(),
            scope,
            artifacts::VERIFICATION_STATUS,
            &status,
        )?;
        self.materialize_markdown(scope, artifacts::VERIFICATION_RESULTS, &result)?;

        info!(
            milestone = index,
            attempt,
            passed = status.passed,
            failures = status.failures.len(),
            "verification finished"
        );
        Ok((status, result))
    }

    /// Synthesize the milestone report from whatever artifacts exist.
    pub async fn report(
        &self,
        manifest: &Manifest,
        index: usize,
        outcome: &str,
        attempts: u32,
    ) -> Result<PhaseResult, PipelineError> {
        let milestone = milestone_at(manifest, index)?;
        let scope = Scope::Milestone(index);
        self.store.ensure_scope(scope)?;

        let existing: Vec<PathBuf> = [
            artifacts::RESEARCH,
            artifacts::PLAN,
            artifacts::STEPS,
            artifacts::EXECUTION_RESULTS,
            artifacts::VERIFICATION_RESULTS,
            artifacts::VERIFICATION_STATUS,
        ]
        .iter()
        .filter(|f| self.store.exists(scope, f))
        .map(|f| self.path(scope, f))
        .collect();
        let refs: Vec<&Path> = existing.iter().map(PathBuf::as_path).collect();

        let prompt = prompts::report_prompt(
            milestone,
            outcome,
            attempts,
            &refs,
            &self.path(scope, artifacts::REPORT),
        );
        let result = self
            .call(PhaseKind::Report, Some(index), None, prompt, None, vec![])
            .await?;

        self.write_answer(scope, artifacts::REPORT, &result)?;
        Ok(result)
    }

    /// Pipeline-wide report, run once at the end of every invocation.
    pub async fn final_report(
        &self,
        milestone_count: usize,
        checkpoint_json: &str,
    ) -> Result<PhaseResult, PipelineError> {
        self.store.ensure_scope(Scope::Pipeline)?;
        let reports: Vec<PathBuf> = (0..milestone_count)
            .filter(|i| self.store.exists(Scope::Milestone(*i), artifacts::REPORT))
            .map(|i| self.path(Scope::Milestone(i), artifacts::REPORT))
            .collect();
        let refs: Vec<&Path> = reports.iter().map(PathBuf::as_path).collect();

        let prompt = prompts::final_report_prompt(
            &self.config.project_name,
            checkpoint_json,
            &refs,
            &self.path(Scope::Pipeline, artifacts::REPORT),
        );
        let result = self
            .call(PhaseKind::FinalReport, None, None, prompt, None, vec![])
            .await?;

        self.write_answer(Scope::Pipeline, artifacts::REPORT, &result)?;
        Ok(result)
    }

    async fn call(
        &self,
        phase: PhaseKind,
        milestone: Option<usize>,
        attempt: Option<u32>,
        prompt: String,
        resume: Option<String>,
        agents: Vec<SubAgent>,
    ) -> Result<PhaseResult, PipelineError> {
        let query = AgentQuery {
            phase,
            milestone,
            attempt,
            prompt,
            allowed_tools: phase.allowed_tools(),
            cwd: self.config.project_dir.clone(),
            resume,
            model: self.config.model.clone(),
            agents,
        };
        self.agent
            .query(query)
            .await
            .map_err(|source| PipelineError::AgentQuery { phase, source })
    }

    /// The manifest the worker wrote, if it reads and validates. A rejected
    /// file is removed so only a stamped manifest ever sits at the gate path.
    fn written_manifest(&self) -> Result<Option<Manifest>, PipelineError> {
        if !self.store.exists(Scope::Pipeline, artifacts::MANIFEST) {
            return Ok(None);
        }
        let written =
            read_json::<Manifest>(self.store.as_ref(), Scope::Pipeline, artifacts::MANIFEST)
                .and_then(|manifest| manifest.validate().map(|_| manifest));
        match written {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e @ (PipelineError::Json { .. } | PipelineError::InvalidManifest(_))) => {
                warn!(error = %e, "worker wrote an unusable manifest, using its output instead");
                self.store.remove(Scope::Pipeline, artifacts::MANIFEST)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn path(&self, scope: Scope, filename: &str) -> PathBuf {
        self.store.path(scope, filename)
    }

    fn require(&self, scope: Scope, phase: PhaseKind) -> Result<(), PipelineError> {
        match phase.inputs().iter().find(|f| !self.store.exists(scope, f)) {
            Some(missing) => Err(PipelineError::ArtifactMissing {
                scope,
                filename: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Store the final answer of a read-only phase as its artifact.
    fn write_answer(
        &self,
        scope: Scope,
        filename: &str,
        result: &PhaseResult,
    ) -> Result<(), PipelineError> {
        if result.output.trim().is_empty() {
            return Err(PipelineError::ArtifactMissing {
                scope,
                filename: filename.to_string(),
            });
        }
        self.store.write(scope, filename, &result.output)
    }

    fn materialize_markdown(
        &self,
        scope: Scope,
        filename: &str,
        result: &PhaseResult,
    ) -> Result<(), PipelineError> {
        if self.store.exists(scope, filename) {
            return Ok(());
        }
        debug!(%scope, filename, "worker did not write artifact, using final answer");
        self.write_answer(scope, filename, result)
    }

    fn materialize_json<T>(
        &self,
        scope: Scope,
        filename: &str,
        result: &PhaseResult,
    ) -> Result<T, PipelineError>
    where
        T: DeserializeOwned + Serialize,
    {
        let mut written_error = None;
        if self.store.exists(scope, filename) {
            match read_json(self.store.as_ref(), scope, filename) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(%scope, filename, error = %e, "worker wrote unreadable artifact");
                    written_error = Some(e);
                }
            }
        }

        match extract_json::<T>(&result.output) {
            Some(value) => {
                write_json(self.store.as_ref(), scope, filename, &value)?;
                Ok(value)
            }
            None => Err(written_error.unwrap_or_else(|| PipelineError::ArtifactMissing {
                scope,
                filename: filename.to_string(),
            })),
        }
    }
}

fn milestone_at(manifest: &Manifest, index: usize) -> Result<&Milestone, PipelineError> {
    manifest.get(index).ok_or_else(|| {
        PipelineError::InvalidManifest(format!(
            "milestone {} is out of range (manifest has {})",
            index,
            manifest.len()
        ))
    })
}
