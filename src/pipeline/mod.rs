//! Pipeline Controller: sequences phases per milestone and owns the
//! Execute↔Verify retry loop.
//!
//! ```text
//! Parse (once) ──► for each milestone from the start index:
//!                    skip if completed
//!                    Research ─► Architect        (only if outputs absent)
//!                    Execute ─► Verify ─┬─ passed ─► Report ─► commit
//!                      ▲                │
//!                      └──── Fix ◄──────┴─ failed, attempts < max
//!                    exhausted ─► Report ─► halt
//!                  FinalReport (always, once per run)
//! ```
//!
//! Every transition is flushed to the checkpoint before the next agent call,
//! so a killed process resumes at the recorded attempt without replaying
//! phases the ledger already holds.

pub mod lock;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::agent::{AgentClient, PhaseResult};
use crate::artifacts::{self, ArtifactStore, Scope, read_json};
use crate::config::Config;
use crate::errors::PipelineError;
use crate::events::{EventLog, PipelineEvent};
use crate::milestone::Manifest;
use crate::notify::{Notification, Notifier, NullNotifier, send_soft};
use crate::phases::{PhaseKind, Phases};
use crate::state::{MilestoneStatus, PipelineState, StateManager};
use crate::tracker::Committer;
use crate::verification::VerificationStatus;

pub use lock::PipelineLock;

/// Per-invocation switches.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub requirements: PathBuf,
    /// Begin at this milestone index instead of the checkpoint's
    pub start_milestone: Option<usize>,
    /// Give milestones left `failed` by an earlier run a fresh retry budget
    pub retry_failed: bool,
    /// Throw away the manifest, checkpoint and milestone artifacts first
    pub reparse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Halted { milestone: usize },
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: PipelineOutcome,
    pub state: PipelineState,
}

pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<dyn ArtifactStore>,
    phases: Phases,
    state_manager: StateManager,
    events: Arc<EventLog>,
    notifier: Arc<dyn Notifier>,
    committer: Option<Arc<dyn Committer>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ArtifactStore>,
        agent: Arc<dyn AgentClient>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            phases: Phases::new(config.clone(), store.clone(), agent),
            state_manager: StateManager::new(store.clone()),
            config,
            store,
            events,
            notifier: Arc::new(NullNotifier),
            committer: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_committer(mut self, committer: Arc<dyn Committer>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Full invocation: take the lock, obtain the manifest (running Parse if
    /// needed), reconcile the checkpoint and run the milestone loop.
    pub async fn execute(&self, options: &PipelineOptions) -> Result<RunSummary, PipelineError> {
        let _lock = PipelineLock::acquire(&self.store.path(Scope::Pipeline, artifacts::LOCK))?;

        if options.reparse {
            self.discard_plan()?;
        }

        let mut state = self.state_manager.load_or_create()?;
        let manifest = self.load_or_parse(options, &mut state).await?;

        let added = state.sync_with_manifest(&manifest);
        if added > 0 {
            info!(added, "checkpoint synced with manifest");
        }
        self.state_manager.save(&mut state)?;

        self.run(&manifest, state, options).await
    }

    /// The milestone loop plus FinalReport, over an explicit state value.
    pub async fn run(
        &self,
        manifest: &Manifest,
        mut state: PipelineState,
        options: &PipelineOptions,
    ) -> Result<RunSummary, PipelineError> {
        state.sync_with_manifest(manifest);

        let start = match options.start_milestone {
            Some(index) if index >= manifest.len() => {
                return Err(PipelineError::InvalidManifest(format!(
                    "start milestone {} is out of range (manifest has {})",
                    index,
                    manifest.len()
                )));
            }
            Some(index) => index,
            None => state.current_milestone,
        };

        if options.retry_failed {
            for ms in state
                .milestones
                .iter_mut()
                .filter(|m| m.status == MilestoneStatus::Failed)
            {
                info!(milestone = ms.id, "reopening failed milestone");
                ms.reopen();
            }
            self.state_manager.save(&mut state)?;
        }

        let mut halted = None;
        for index in start..manifest.len() {
            state.current_milestone = index;
            let status = state.milestones[index].status;

            if status == MilestoneStatus::Completed {
                info!(milestone = index, "milestone already completed, skipping");
                continue;
            }
            if status == MilestoneStatus::Failed {
                let reason = format!(
                    "milestone {} failed in a previous run; rerun with --retry-failed",
                    index
                );
                warn!("{}", reason);
                self.events
                    .emit(PipelineEvent::PipelineBlocked { milestone: index, reason });
                halted = Some(index);
                break;
            }

            if !self.run_milestone(manifest, &mut state, index).await? {
                halted = Some(index);
                break;
            }
        }
        self.state_manager.save(&mut state)?;

        self.final_report(manifest, &mut state).await?;

        let outcome = match halted {
            Some(milestone) => PipelineOutcome::Halted { milestone },
            None => PipelineOutcome::Completed,
        };
        let status = match outcome {
            PipelineOutcome::Completed => "completed",
            PipelineOutcome::Halted { .. } => "halted",
        };
        self.events.emit(PipelineEvent::PipelineComplete {
            status: status.to_string(),
            completed: state.completed_count(),
            total: manifest.len(),
            total_cost: state.total_cost,
        });
        self.notify(
            Notification::new(
                format!("{}: pipeline {}", self.config.project_name, status),
                format!(
                    "{}/{} milestones completed, ${:.2} spent",
                    state.completed_count(),
                    manifest.len(),
                    state.total_cost
                ),
            )
            .tag(if halted.is_some() { "warning" } else { "tada" }),
        )
        .await;

        info!(%status, total_cost = state.total_cost, "pipeline finished");
        Ok(RunSummary { outcome, state })
    }

    /// Run one milestone to a terminal status. Returns whether it passed.
    async fn run_milestone(
        &self,
        manifest: &Manifest,
        state: &mut PipelineState,
        index: usize,
    ) -> Result<bool, PipelineError> {
        let milestone = &manifest.milestones[index];
        self.store.ensure_scope(Scope::Milestone(index))?;
        {
            let ms = &mut state.milestones[index];
            ms.status = MilestoneStatus::InProgress;
            ms.started_at.get_or_insert_with(Utc::now);
        }
        self.state_manager.save(state)?;

        info!(milestone = index, name = %milestone.name, "milestone started");
        self.events.emit(PipelineEvent::MilestoneStart {
            milestone: index,
            name: milestone.name.clone(),
            version: milestone.version.clone(),
        });
        self.notify(Notification::new(
            format!("Milestone {:02} started", index),
            milestone.name.clone(),
        ))
        .await;

        self.run_gated(manifest, state, index, PhaseKind::Research)
            .await?;
        self.run_gated(manifest, state, index, PhaseKind::Architect)
            .await?;

        let passed = self.execute_verify_loop(manifest, state, index).await?;
        let attempts = state.milestones[index].attempts;

        let outcome = if passed { "completed" } else { "failed" };
        self.phase_started(PhaseKind::Report, Some(index), None);
        let result = self
            .phases
            .report(manifest, index, outcome, attempts)
            .await?;
        self.phase_finished(state, PhaseKind::Report, Some(index), None, &result)?;

        let status = if passed {
            MilestoneStatus::Completed
        } else {
            MilestoneStatus::Failed
        };
        {
            let ms = &mut state.milestones[index];
            ms.status = status;
            ms.completed_at = Some(Utc::now());
        }
        self.state_manager.save(state)?;

        let ms = &state.milestones[index];
        self.events.emit(PipelineEvent::MilestoneComplete {
            milestone: index,
            status,
            attempts: ms.attempts,
            cost: ms.cost,
        });

        if passed {
            info!(milestone = index, attempts, "milestone completed");
            self.notify(
                Notification::new(
                    format!("Milestone {:02} completed", index),
                    format!("{} after {} attempt(s)", milestone.name, attempts),
                )
                .tag("white_check_mark"),
            )
            .await;
            self.commit(manifest, index).await;
        } else {
            let reason = PipelineError::RetryExhausted {
                milestone: index,
                attempts,
            }
            .to_string();
            warn!("{}", reason);
            self.notify(
                Notification::new(format!("Milestone {:02} failed", index), reason.clone())
                    .priority(4)
                    .tag("x"),
            )
            .await;
            self.events.emit(PipelineEvent::PipelineBlocked {
                milestone: index,
                reason,
            });
        }

        Ok(passed)
    }

    /// Research/Architect gate: run only if some output artifact is absent.
    async fn run_gated(
        &self,
        manifest: &Manifest,
        state: &mut PipelineState,
        index: usize,
        phase: PhaseKind,
    ) -> Result<(), PipelineError> {
        let scope = Scope::Milestone(index);
        let outputs_exist = phase
            .outputs()
            .iter()
            .all(|f| self.store.exists(scope, f));
        let recorded = state.milestones[index].has_phase(phase);

        if outputs_exist {
            if !recorded {
                warn!(
                    milestone = index,
                    %phase,
                    "artifacts exist without a completion record, adopting them"
                );
                state.record_phase(Some(index), phase, None, &PhaseResult::default());
                self.state_manager.save(state)?;
            }
            return Ok(());
        }
        if recorded {
            warn!(milestone = index, %phase, "recorded phase lost its artifacts, running again");
        }

        self.phase_started(phase, Some(index), None);
        let result = match phase {
            PhaseKind::Research => self.phases.research(manifest, index).await?,
            _ => self.phases.architect(manifest, index).await?,
        };
        self.phase_finished(state, phase, Some(index), None, &result)
    }

    /// Attempt 1 runs Execute, later attempts run Fix; Verify follows every
    /// attempt. Re-entered at the checkpoint's `attempts` on resume.
    async fn execute_verify_loop(
        &self,
        manifest: &Manifest,
        state: &mut PipelineState,
        index: usize,
    ) -> Result<bool, PipelineError> {
        let max_attempts = self.config.max_retries;

        // Attempts only advance past a failed Verify, so a checkpoint beyond a
        // lowered budget has already failed its last allowed attempt
        let recorded = state.milestones[index].attempts;
        if recorded > max_attempts {
            warn!(
                milestone = index,
                attempts = recorded,
                max_attempts,
                "checkpoint is past the retry budget, milestone is exhausted"
            );
            state.milestones[index].attempts = max_attempts;
            self.state_manager.save(state)?;
            return Ok(false);
        }

        loop {
            if state.milestones[index].attempts == 0 {
                state.milestones[index].attempts = 1;
                self.state_manager.save(state)?;
            }
            let attempt = state.milestones[index].attempts;

            let status = match self.recorded_status(state, index, attempt)? {
                Some(status) => status,
                None => {
                    self.events.emit(PipelineEvent::ExecuteVerifyAttempt {
                        milestone: index,
                        attempt,
                        max_attempts,
                    });
                    self.run_attempt(manifest, state, index, attempt).await?
                }
            };

            if status.passed {
                return Ok(true);
            }
            if attempt >= max_attempts {
                return Ok(false);
            }

            info!(
                milestone = index,
                attempt,
                failures = ?status.failures,
                "verification failed, retrying"
            );
            self.events.emit(PipelineEvent::ExecuteVerifyRetry {
                milestone: index,
                attempt: attempt + 1,
                failures: status.failures.clone(),
            });
            self.notify(Notification::new(
                format!("Milestone {:02} retry {}/{}", index, attempt + 1, max_attempts),
                status.failures.join(", "),
            ))
            .await;

            state.milestones[index].attempts = attempt + 1;
            self.state_manager.save(state)?;
        }
    }

    async fn run_attempt(
        &self,
        manifest: &Manifest,
        state: &mut PipelineState,
        index: usize,
        attempt: u32,
    ) -> Result<VerificationStatus, PipelineError> {
        let work = if attempt == 1 {
            PhaseKind::Execute
        } else {
            PhaseKind::Fix
        };

        if !state.milestones[index].has_phase_for_attempt(work, attempt) {
            self.phase_started(work, Some(index), Some(attempt));
            let result = if work == PhaseKind::Execute {
                self.phases.execute(manifest, index, attempt).await?
            } else {
                let resume = if self.config.session_continuity {
                    state.milestones[index].session_id.clone()
                } else {
                    None
                };
                self.phases.fix(manifest, index, attempt, resume).await?
            };
            self.phase_finished(state, work, Some(index), Some(attempt), &result)?;
        }

        self.phase_started(PhaseKind::Verify, Some(index), Some(attempt));
        let (status, result) = self.phases.verify(manifest, index, attempt).await?;
        self.phase_finished(state, PhaseKind::Verify, Some(index), Some(attempt), &result)?;
        Ok(status)
    }

    /// The status of an already-recorded Verify for this attempt, if its
    /// artifact is still there.
    fn recorded_status(
        &self,
        state: &PipelineState,
        index: usize,
        attempt: u32,
    ) -> Result<Option<VerificationStatus>, PipelineError> {
        if !state.milestones[index].has_phase_for_attempt(PhaseKind::Verify, attempt) {
            return Ok(None);
        }
        match read_json::<VerificationStatus>(
            self.store.as_ref(),
            Scope::Milestone(index),
            artifacts::VERIFICATION_STATUS,
        ) {
            Ok(status) => Ok(Some(status.normalized(index))),
            Err(e) if e.is_artifact_missing() => {
                warn!(
                    milestone = index,
                    attempt,
                    "recorded verification lost its status, verifying again"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn final_report(
        &self,
        manifest: &Manifest,
        state: &mut PipelineState,
    ) -> Result<(), PipelineError> {
        let checkpoint = serde_json::to_string_pretty(&*state).map_err(|source| {
            PipelineError::Json {
                path: self.store.path(Scope::Pipeline, artifacts::STATE),
                source,
            }
        })?;

        self.phase_started(PhaseKind::FinalReport, None, None);
        let result = self
            .phases
            .final_report(manifest.len(), &checkpoint)
            .await?;
        self.phase_finished(state, PhaseKind::FinalReport, None, None, &result)
    }

    async fn load_or_parse(
        &self,
        options: &PipelineOptions,
        state: &mut PipelineState,
    ) -> Result<Manifest, PipelineError> {
        if let Some(manifest) = self.stored_manifest()? {
            match std::fs::read_to_string(&options.requirements) {
                Ok(requirements) if manifest.is_stale_for(&requirements) => warn!(
                    requirements = %options.requirements.display(),
                    "requirements changed since the manifest was parsed; continuing with the existing plan (use --reparse to re-plan)"
                ),
                Ok(_) => {}
                Err(e) => warn!(
                    requirements = %options.requirements.display(),
                    error = %e,
                    "cannot read requirements to check manifest freshness"
                ),
            }
            return Ok(manifest);
        }

        if !state.milestones.is_empty() {
            warn!("checkpoint exists without a manifest, starting over");
            *state = PipelineState::new();
            self.store.clear_milestones()?;
        }

        self.phase_started(PhaseKind::Parse, None, None);
        let (manifest, result) = self.phases.parse(&options.requirements).await?;
        state.requirements_hash = manifest.requirements_hash.clone();
        self.phase_finished(state, PhaseKind::Parse, None, None, &result)?;
        Ok(manifest)
    }

    /// The manifest Parse produced, if any. An unreadable or unstamped
    /// invalid file is what an interrupted Parse leaves behind and is
    /// discarded; a stamped manifest that no longer validates is an error.
    fn stored_manifest(&self) -> Result<Option<Manifest>, PipelineError> {
        if !self.store.exists(Scope::Pipeline, artifacts::MANIFEST) {
            return Ok(None);
        }
        let discard = |e: PipelineError| -> Result<Option<Manifest>, PipelineError> {
            warn!(error = %e, "discarding manifest left by an interrupted parse");
            self.store.remove(Scope::Pipeline, artifacts::MANIFEST)?;
            Ok(None)
        };
        match read_json::<Manifest>(self.store.as_ref(), Scope::Pipeline, artifacts::MANIFEST) {
            Ok(manifest) => match manifest.validate() {
                Ok(()) => Ok(Some(manifest)),
                Err(e) if manifest.requirements_hash.is_some() => Err(e),
                Err(e) => discard(e),
            },
            Err(e @ PipelineError::Json { .. }) => discard(e),
            Err(e) => Err(e),
        }
    }

    fn discard_plan(&self) -> Result<(), PipelineError> {
        info!("discarding manifest, checkpoint and milestone artifacts");
        self.store.remove(Scope::Pipeline, artifacts::MANIFEST)?;
        self.state_manager.reset()?;
        self.store.clear_milestones()
    }

    async fn commit(&self, manifest: &Manifest, index: usize) {
        let Some(ref committer) = self.committer else {
            return;
        };
        if let Err(e) = committer.commit_milestone(&manifest.milestones[index]).await {
            warn!(milestone = index, error = %e, "commit failed");
        }
    }

    async fn notify(&self, notification: Notification) {
        send_soft(self.notifier.as_ref(), notification).await;
    }

    fn phase_started(&self, phase: PhaseKind, milestone: Option<usize>, attempt: Option<u32>) {
        info!(%phase, milestone, attempt, "phase started");
        self.events.emit(PipelineEvent::PhaseStart {
            phase,
            milestone,
            attempt,
        });
    }

    fn phase_finished(
        &self,
        state: &mut PipelineState,
        phase: PhaseKind,
        milestone: Option<usize>,
        attempt: Option<u32>,
        result: &PhaseResult,
    ) -> Result<(), PipelineError> {
        state.record_phase(milestone, phase, attempt, result);
        self.state_manager.save(state)?;
        self.events.emit(PipelineEvent::PhaseComplete {
            phase,
            milestone,
            attempt,
            cost: result.cost,
            duration_ms: result.duration_ms,
            turns: result.turns,
        });
        Ok(())
    }
}
