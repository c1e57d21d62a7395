//! Artifact storage for the pipeline.
//!
//! Every phase communicates with later phases (and with the controller's
//! skip gate) through named files. Files live either at the pipeline root or
//! in a per-milestone directory:
//!
//! ```text
//! .waypoint/
//! ├── milestones.json          # manifest produced by Parse
//! ├── pipeline-state.json      # checkpoint
//! ├── report.md                # final report
//! ├── events.jsonl             # event stream mirror
//! └── milestones/
//!     ├── 00/
//!     │   ├── research.md
//!     │   ├── plan.md
//!     │   └── ...
//!     └── 01/
//! ```
//!
//! Writes go through a hidden temp file in the target directory followed by a
//! rename, so `exists` never reports a file that is still being written.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::errors::PipelineError;

pub const MANIFEST: &str = "milestones.json";
pub const STATE: &str = "pipeline-state.json";
pub const EVENTS: &str = "events.jsonl";
pub const LOCK: &str = "pipeline.lock";
pub const RESEARCH: &str = "research.md";
pub const PLAN: &str = "plan.md";
pub const STEPS: &str = "steps.json";
pub const VALIDATION: &str = "validation.md";
pub const EXECUTION_RESULTS: &str = "execution-results.md";
pub const VERIFICATION_RESULTS: &str = "verification-results.md";
pub const VERIFICATION_STATUS: &str = "verification-status.json";
pub const REPORT: &str = "report.md";

const MILESTONES_DIR: &str = "milestones";

/// Where an artifact lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Pipeline,
    Milestone(usize),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Pipeline => write!(f, "pipeline"),
            Scope::Milestone(index) => write!(f, "milestone {:02}", index),
        }
    }
}

/// Durable key/value file storage keyed by (scope, filename).
pub trait ArtifactStore: Send + Sync {
    /// Absolute path an artifact would have. Does not touch the filesystem.
    fn path(&self, scope: Scope, filename: &str) -> PathBuf;

    /// Atomically replace the artifact's content.
    fn write(&self, scope: Scope, filename: &str, content: &str) -> Result<(), PipelineError>;

    /// Read the artifact. Fails with `ArtifactMissing` if it does not exist.
    fn read(&self, scope: Scope, filename: &str) -> Result<String, PipelineError>;

    fn exists(&self, scope: Scope, filename: &str) -> bool;

    fn remove(&self, scope: Scope, filename: &str) -> Result<(), PipelineError>;

    /// Create the directory backing a scope.
    fn ensure_scope(&self, scope: Scope) -> Result<PathBuf, PipelineError>;

    /// Delete every milestone directory.
    fn clear_milestones(&self) -> Result<(), PipelineError>;
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    scope: Scope,
    filename: &str,
) -> Result<T, PipelineError> {
    let content = store.read(scope, filename)?;
    serde_json::from_str(&content).map_err(|source| PipelineError::Json {
        path: store.path(scope, filename),
        source,
    })
}

/// Serialize and atomically write a JSON artifact (pretty-printed).
pub fn write_json<T: Serialize>(
    store: &dyn ArtifactStore,
    scope: Scope,
    filename: &str,
    value: &T,
) -> Result<(), PipelineError> {
    let content = serde_json::to_string_pretty(value).map_err(|source| PipelineError::Json {
        path: store.path(scope, filename),
        source,
    })?;
    store.write(scope, filename, &content)
}

/// Filesystem-backed artifact store rooted at the pipeline directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Pipeline => self.root.clone(),
            Scope::Milestone(index) => self
                .root
                .join(MILESTONES_DIR)
                .join(format!("{:02}", index)),
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn path(&self, scope: Scope, filename: &str) -> PathBuf {
        self.dir(scope).join(filename)
    }

    fn write(&self, scope: Scope, filename: &str, content: &str) -> Result<(), PipelineError> {
        let dir = self.ensure_scope(scope)?;
        let path = dir.join(filename);
        let temp_path = dir.join(format!(".{}.{}.tmp", filename, Uuid::new_v4().simple()));

        debug!(path = %path.display(), bytes = content.len(), "writing artifact");

        let write_temp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()
        };
        if let Err(source) = write_temp() {
            let _ = fs::remove_file(&temp_path);
            return Err(PipelineError::io(&temp_path, source));
        }

        fs::rename(&temp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            PipelineError::io(&path, source)
        })
    }

    fn read(&self, scope: Scope, filename: &str) -> Result<String, PipelineError> {
        let path = self.path(scope, filename);
        fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ArtifactMissing {
                    scope,
                    filename: filename.to_string(),
                }
            } else {
                PipelineError::io(&path, source)
            }
        })
    }

    fn exists(&self, scope: Scope, filename: &str) -> bool {
        self.path(scope, filename).is_file()
    }

    fn remove(&self, scope: Scope, filename: &str) -> Result<(), PipelineError> {
        let path = self.path(scope, filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::io(&path, source)),
        }
    }

    fn ensure_scope(&self, scope: Scope) -> Result<PathBuf, PipelineError> {
        let dir = self.dir(scope);
        fs::create_dir_all(&dir).map_err(|source| PipelineError::io(&dir, source))?;
        Ok(dir)
    }

    fn clear_milestones(&self) -> Result<(), PipelineError> {
        let dir = self.root.join(MILESTONES_DIR);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PipelineError::io(&dir, source)),
        }
    }
}
