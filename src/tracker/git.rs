use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, Signature};
use std::path::Path;
#[cfg(test)]
use std::path::PathBuf;

/// Paths under the pipeline directory that never belong in a commit.
const EXCLUDED: &[&str] = &[".waypoint/logs", ".waypoint/pipeline.lock"];

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Stage everything and commit. Returns `None` when the tree is unchanged.
    pub fn commit_all(&self, message: &str) -> Result<Option<String>> {
        let mut index = self.repo.index()?;

        let skip_excluded: &mut git2::IndexMatchedPath = &mut |path: &Path, _spec: &[u8]| {
            // In-flight artifact writes are hidden `.name.<id>.tmp` files
            let in_flight = path.file_name().is_some_and(|name| {
                let name = name.to_string_lossy();
                name.starts_with('.') && name.ends_with(".tmp")
            });
            let path = path.to_string_lossy();
            if in_flight || EXCLUDED.iter().any(|prefix| path.starts_with(prefix)) {
                1
            } else {
                0
            }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::DEFAULT,
            Some(skip_excluded),
        )?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.get_head_commit();
        if let Some(ref parent) = parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("waypoint", "waypoint@localhost"))?;

        // Handle unborn branch (new repo with no commits yet)
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .context("Failed to create commit")?;

        Ok(Some(commit_id.to_string()))
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    #[cfg(test)]
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }

    /// Files changed by the HEAD commit relative to its parent.
    #[cfg(test)]
    pub fn files_in_head(&self) -> Result<Vec<PathBuf>> {
        let Some(head) = self.get_head_commit() else {
            return Ok(Vec::new());
        };
        let tree = head.tree()?;
        let parent_tree = head.parent(0).ok().map(|p| p.tree()).transpose()?;
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        Ok(diff
            .deltas()
            .filter_map(|d| d.new_file().path().map(Path::to_path_buf))
            .collect())
    }
}
