//! Branch operations for GitManager

use git2::BranchType;
use std::path::Path;

use crate::error::Result;
use crate::git::GitManager;

impl GitManager {
    /// Name of the branch checked out in the project root
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = self.repo.head()?;
        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            Ok(None)
        }
    }

    /// Check whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Commit id at the tip of a local branch
    pub fn branch_tip(&self, name: &str) -> Result<String> {
        let branch = self.repo.find_branch(name, BranchType::Local)?;
        Ok(branch.get().peel_to_commit()?.id().to_string())
    }

    /// HEAD commit of the project root
    pub fn head_commit(&self) -> Result<String> {
        self.head_commit_in(self.root())
    }

    /// HEAD commit of any worktree of this repository
    pub fn head_commit_in(&self, dir: &Path) -> Result<String> {
        Ok(self.run_in(dir, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Check out a branch in the project root
    pub fn checkout(&self, branch: &str) -> Result<()> {
        log::debug!("[GitManager] Checking out {}", branch);
        self.run(&["checkout", branch])?;
        Ok(())
    }

    /// Force-delete a local branch
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", "-D", name])?;
        log::info!("[GitManager] Deleted branch {}", name);
        Ok(())
    }
}
