//! Merge attempts for GitManager
//!
//! Each method either completes or puts the tree back where it started.

use std::path::Path;

use crate::error::{Error, Result};
use crate::git::types::MergeAttempt;
use crate::git::GitManager;

impl GitManager {
    /// Fast-forward the checked-out branch to `branch`.
    /// `Ok(false)` means the histories have diverged.
    pub fn merge_ff_only(&self, branch: &str) -> Result<bool> {
        let output = self.output_in(self.root(), &["merge", "--ff-only", branch])?;
        if output.success {
            log::info!("[GitManager] Fast-forwarded to {}", branch);
            return Ok(true);
        }

        if !self.is_clean_in(self.root())? {
            return Err(Error::Git(format!(
                "fast-forward to {} failed and left changes behind: {}",
                branch,
                output.stderr.trim()
            )));
        }
        log::debug!(
            "[GitManager] Cannot fast-forward to {}: {}",
            branch,
            output.stderr.trim()
        );
        Ok(false)
    }

    /// Rebase the branch checked out in `dir` onto `onto`.
    /// A failed rebase is aborted and reported as `Ok(false)`.
    pub fn rebase_in(&self, dir: &Path, onto: &str) -> Result<bool> {
        let output = self.output_in(dir, &["rebase", onto])?;
        if output.success {
            log::info!("[GitManager] Rebased {} onto {}", dir.display(), onto);
            return Ok(true);
        }

        log::info!(
            "[GitManager] Rebase onto {} failed in {}: {}",
            onto,
            dir.display(),
            output.stderr.trim()
        );
        // Nothing to abort when the rebase refused to start
        let abort = self.output_in(dir, &["rebase", "--abort"])?;
        if !abort.success {
            log::debug!("[GitManager] rebase --abort: {}", abort.stderr.trim());
        }
        Ok(false)
    }

    /// Create a merge commit for `branch` on the checked-out branch.
    /// On conflict the merge is aborted and the tree verified clean.
    pub fn merge_no_ff(&self, branch: &str) -> Result<MergeAttempt> {
        let output = self.output_in(self.root(), &["merge", "--no-ff", "--no-edit", branch])?;
        if output.success {
            let commit = self.head_commit()?;
            log::info!("[GitManager] Merged {} as {}", branch, commit);
            return Ok(MergeAttempt::Merged(commit));
        }

        let conflicts = self.conflicted_files_in(self.root())?;
        if let Err(e) = self.abort_merge() {
            log::warn!("[GitManager] {}", e);
        }
        if !self.is_clean_in(self.root())? {
            // Last resort so the target never keeps conflict markers
            self.run(&["reset", "--hard", "HEAD"])?;
            if !self.is_clean_in(self.root())? {
                return Err(Error::Git(format!(
                    "merge of {} could not be rolled back; inspect {}",
                    branch,
                    self.root().display()
                )));
            }
        }

        if conflicts.is_empty() {
            return Err(Error::Git(format!(
                "git merge --no-ff {} failed: {}",
                branch,
                output.stderr.trim()
            )));
        }

        log::warn!("[GitManager] Merge of {} conflicts in {:?}", branch, conflicts);
        Ok(MergeAttempt::Conflict(conflicts))
    }

    /// Abort an ongoing merge in the project root
    pub fn abort_merge(&self) -> Result<()> {
        log::info!("[GitManager] Aborting merge");
        self.run(&["merge", "--abort"])?;
        Ok(())
    }

    /// Paths with unresolved conflicts
    pub fn conflicted_files_in(&self, dir: &Path) -> Result<Vec<String>> {
        let stdout = self.run_in(dir, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// No staged, unstaged or unmerged changes to tracked files.
    /// Untracked files (such as `.integrator/`) don't count.
    pub fn is_clean_in(&self, dir: &Path) -> Result<bool> {
        let stdout = self.run_in(dir, &["status", "--porcelain", "--untracked-files=no"])?;
        Ok(stdout.trim().is_empty())
    }
}
