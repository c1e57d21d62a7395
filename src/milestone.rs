//! Milestone definitions and the `milestones.json` manifest.
//!
//! The manifest is produced once by the Parse phase and never mutated
//! afterwards. Index in `milestones` is execution order, and milestone ids
//! equal their index so `dependencies` can only point backwards.

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::util::{content_hash, extract_json};

/// One ordered unit of the overall build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: usize,
    #[serde(default)]
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub docs: Vec<String>,
    /// Ids of earlier milestones this one builds on
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default)]
    pub language: String,
}

/// The full `milestones.json` format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub project: ProjectInfo,
    pub milestones: Vec<Milestone>,
    /// SHA-256 of the requirements document the manifest was parsed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_hash: Option<String>,
}

impl Manifest {
    /// Parse a manifest out of agent output that may wrap the JSON in prose.
    pub fn from_output(output: &str) -> Result<Self, PipelineError> {
        let manifest: Manifest = extract_json(output).ok_or_else(|| {
            PipelineError::InvalidManifest(
                "no JSON object with 'project' and 'milestones' found in output".to_string(),
            )
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the ordering and dependency invariants.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.milestones.is_empty() {
            return Err(PipelineError::InvalidManifest(
                "manifest defines no milestones".to_string(),
            ));
        }

        for (index, milestone) in self.milestones.iter().enumerate() {
            if milestone.id != index {
                return Err(PipelineError::InvalidManifest(format!(
                    "milestone at position {} has id {} (ids must follow document order starting at 0)",
                    index, milestone.id
                )));
            }
            if milestone.name.trim().is_empty() {
                return Err(PipelineError::InvalidManifest(format!(
                    "milestone {} has an empty name",
                    index
                )));
            }
            if let Some(dep) = milestone.dependencies.iter().find(|dep| **dep >= index) {
                return Err(PipelineError::InvalidManifest(format!(
                    "milestone {} depends on {}, which is not an earlier milestone",
                    index, dep
                )));
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Milestone> {
        self.milestones.get(index)
    }

    /// Record which requirements document this manifest came from.
    pub fn stamp_requirements(&mut self, requirements: &str) {
        self.requirements_hash = Some(content_hash(requirements));
    }

    /// True when the manifest was stamped from different requirements.
    /// Unstamped manifests are never considered stale.
    pub fn is_stale_for(&self, requirements: &str) -> bool {
        self.requirements_hash
            .as_deref()
            .is_some_and(|hash| hash != content_hash(requirements))
    }
}
