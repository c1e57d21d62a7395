use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::errors::PipelineError;

/// Exclusive advisory lock on `.waypoint/pipeline.lock`, released on drop.
#[derive(Debug)]
pub struct PipelineLock {
    file: File,
    path: PathBuf,
}

impl PipelineLock {
    /// Take the lock or fail immediately if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::io(parent, source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| PipelineError::io(path, source))?;

        file.try_lock_exclusive()
            .map_err(|_| PipelineError::Locked {
                path: path.to_path_buf(),
            })?;

        // Holder's pid, for humans inspecting a stuck lock
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        debug!(path = %path.display(), "pipeline lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
