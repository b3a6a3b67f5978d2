//! Remote operations and ancestry checks for GitManager

use git2::Oid;
use std::path::Path;

use crate::error::{Error, Result};
use crate::git::GitManager;

impl GitManager {
    /// Check whether a remote is configured
    pub fn has_remote(&self, remote: &str) -> bool {
        self.repo.find_remote(remote).is_ok()
    }

    /// Fetch one branch from a remote
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.fetch_in(self.root(), remote, branch)
    }

    /// Fetch one branch from inside `dir`, e.g. a linked worktree
    pub fn fetch_in(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.run_in(dir, &["fetch", remote, branch])?;
        log::debug!("[GitManager] Fetched {}/{} in {}", remote, branch, dir.display());
        Ok(())
    }

    /// Fast-forward the checked-out branch from the remote
    pub fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["pull", "--ff-only", remote, branch])?;
        log::debug!("[GitManager] Pulled {}/{}", remote, branch);
        Ok(())
    }

    /// Push HEAD to `target` on the remote with an explicit refspec
    pub fn push_head(&self, remote: &str, target: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", target);
        self.run(&["push", remote, &refspec])?;
        log::info!("[GitManager] Pushed HEAD to {}/{}", remote, target);
        Ok(())
    }

    /// Ask the remote whether it has a branch
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", branch);
        let stdout = self.run(&["ls-remote", "--heads", remote, &refname])?;
        Ok(!stdout.trim().is_empty())
    }

    pub fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["push", remote, "--delete", branch])?;
        log::info!("[GitManager] Deleted {}/{}", remote, branch);
        Ok(())
    }

    /// Tip of the remote-tracking ref for `branch`, as of the last fetch
    pub fn remote_tip(&self, remote: &str, branch: &str) -> Result<String> {
        let refname = format!("refs/remotes/{}/{}", remote, branch);
        let oid = self.repo.refname_to_id(&refname).map_err(|e| {
            Error::Git(format!("cannot resolve {}: {}", refname, e.message()))
        })?;
        Ok(oid.to_string())
    }

    /// Whether `commit` is `tip` or one of its ancestors
    pub fn is_ancestor(&self, commit: &str, tip: &str) -> Result<bool> {
        let commit = Oid::from_str(commit)?;
        let tip = Oid::from_str(tip)?;
        if commit == tip {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(tip, commit)?)
    }
}
