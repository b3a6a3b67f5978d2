//! Worktree management for GitManager

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

impl GitManager {
    /// Add a worktree at `path` with `branch` checked out
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(&["worktree", "add", path_str.as_ref(), branch])?;
        log::debug!("[GitManager] Added worktree {} for {}", path.display(), branch);
        Ok(())
    }

    /// List all worktrees, the project root first
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>> {
        let stdout = self.run(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&stdout))
    }

    /// Worktree that has `branch` checked out, if any
    pub fn worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|w| w.branch.as_deref() == Some(branch))
            .map(|w| w.path))
    }

    /// Remove a worktree; a directory already gone is only pruned
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        if path.exists() {
            let path_str = path.to_string_lossy();
            self.run(&["worktree", "remove", "--force", path_str.as_ref()])?;
            log::info!("[GitManager] Removed worktree {}", path.display());
        }
        self.prune_worktrees()
    }

    /// Drop bookkeeping for worktrees whose directories no longer exist
    pub fn prune_worktrees(&self) -> Result<()> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }
}

/// Parse `git worktree list --porcelain`
pub(crate) fn parse_worktree_list(stdout: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                head: None,
                branch: None,
            });
        } else if let Some(info) = current.as_mut() {
            if let Some(head) = line.strip_prefix("HEAD ") {
                info.head = Some(head.to_string());
            } else if let Some(branch) = line.strip_prefix("branch ") {
                info.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        }
    }

    if let Some(done) = current {
        worktrees.push(done);
    }
    worktrees
}
