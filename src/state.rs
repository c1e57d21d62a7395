//! The persisted checkpoint: `pipeline-state.json`.
//!
//! `PipelineState` is the single mutable root of a run. The controller owns
//! it by value and flushes it through [`StateManager::save`] after every
//! transition, so a crashed run resumes from the last completed step.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::PhaseResult;
use crate::artifacts::{self, ArtifactStore, Scope, read_json, write_json};
use crate::errors::PipelineError;
use crate::milestone::{Manifest, Milestone};
use crate::phases::PhaseKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilestoneStatus::Pending => write!(f, "pending"),
            MilestoneStatus::InProgress => write!(f, "in_progress"),
            MilestoneStatus::Completed => write!(f, "completed"),
            MilestoneStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One completed phase invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneState {
    pub id: usize,
    #[serde(default)]
    pub version: String,
    pub status: MilestoneStatus,
    pub attempts: u32,
    pub cost: f64,
    /// Completion ledger, in invocation order
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
    /// Continuation token of the last Execute/Fix call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MilestoneState {
    pub fn new(milestone: &Milestone) -> Self {
        Self {
            id: milestone.id,
            version: milestone.version.clone(),
            status: MilestoneStatus::Pending,
            attempts: 0,
            cost: 0.0,
            phases: Vec::new(),
            session_id: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn has_phase(&self, phase: PhaseKind) -> bool {
        self.phases.iter().any(|r| r.phase == phase)
    }

    pub fn has_phase_for_attempt(&self, phase: PhaseKind, attempt: u32) -> bool {
        self.phases
            .iter()
            .any(|r| r.phase == phase && r.attempt == Some(attempt))
    }

    pub fn is_completed(&self) -> bool {
        self.status == MilestoneStatus::Completed
    }

    fn record(&mut self, phase: PhaseKind, attempt: Option<u32>, result: &PhaseResult) {
        self.cost += result.cost;
        if matches!(phase, PhaseKind::Execute | PhaseKind::Fix) && result.session_id.is_some() {
            self.session_id = result.session_id.clone();
        }
        self.phases.push(PhaseRecord {
            phase,
            attempt,
            cost: result.cost,
            session_id: result.session_id.clone(),
            completed_at: Utc::now(),
        });
    }

    /// Forget a failed run's retry loop so the milestone gets a fresh budget.
    /// Research and Architect records (and their artifacts) are kept.
    pub fn reopen(&mut self) {
        self.status = MilestoneStatus::Pending;
        self.attempts = 0;
        self.completed_at = None;
        self.session_id = None;
        self.phases.retain(|r| {
            !matches!(
                r.phase,
                PhaseKind::Execute | PhaseKind::Fix | PhaseKind::Verify
            )
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    pub started_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    pub current_milestone: usize,
    pub milestones: Vec<MilestoneState>,
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_hash: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            current_milestone: 0,
            milestones: Vec::new(),
            total_cost: 0.0,
            requirements_hash: None,
        }
    }

    /// Make `milestones` line up with the manifest. Returns how many entries
    /// were added.
    pub fn sync_with_manifest(&mut self, manifest: &Manifest) -> usize {
        if self.milestones.len() > manifest.len() {
            warn!(
                checkpoint = self.milestones.len(),
                manifest = manifest.len(),
                "checkpoint has more milestones than the manifest, dropping the extras"
            );
            self.milestones.truncate(manifest.len());
        }

        let existing = self.milestones.len();
        for milestone in &manifest.milestones[existing..] {
            self.milestones.push(MilestoneState::new(milestone));
        }
        if self.requirements_hash.is_none() {
            self.requirements_hash = manifest.requirements_hash.clone();
        }
        self.current_milestone = self.current_milestone.min(manifest.len().saturating_sub(1));
        manifest.len() - existing
    }

    /// Add a phase's reported cost to the totals and, for milestone phases,
    /// to the milestone's ledger.
    pub fn record_phase(
        &mut self,
        milestone: Option<usize>,
        phase: PhaseKind,
        attempt: Option<u32>,
        result: &PhaseResult,
    ) {
        self.total_cost += result.cost;
        if let Some(index) = milestone
            && let Some(ms) = self.milestones.get_mut(index)
        {
            ms.record(phase, attempt, result);
        }
    }

    pub fn milestone(&self, index: usize) -> Option<&MilestoneState> {
        self.milestones.get(index)
    }

    pub fn completed_count(&self) -> usize {
        self.milestones.iter().filter(|m| m.is_completed()).count()
    }

    pub fn failed_milestone(&self) -> Option<usize> {
        self.milestones
            .iter()
            .position(|m| m.status == MilestoneStatus::Failed)
    }

    pub fn is_finished(&self) -> bool {
        !self.milestones.is_empty() && self.milestones.iter().all(|m| m.is_completed())
    }
}

/// Loads and flushes the checkpoint through the artifact store.
pub struct StateManager {
    store: Arc<dyn ArtifactStore>,
}

impl StateManager {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<PipelineState>, PipelineError> {
        match read_json(self.store.as_ref(), Scope::Pipeline, artifacts::STATE) {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_artifact_missing() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn load_or_create(&self) -> Result<PipelineState, PipelineError> {
        Ok(self.load()?.unwrap_or_else(|| {
            debug!("no checkpoint found, starting a new pipeline state");
            PipelineState::new()
        }))
    }

    pub fn save(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        state.updated_at = Utc::now();
        write_json(self.store.as_ref(), Scope::Pipeline, artifacts::STATE, state)
    }

    pub fn reset(&self) -> Result<(), PipelineError> {
        self.store.remove(Scope::Pipeline, artifacts::STATE)
    }
}
