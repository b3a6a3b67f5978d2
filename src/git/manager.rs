//! Core GitManager implementation
//!
//! Contains the GitManager struct and the `git` command runner

use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::git::types::GitOutput;

/// Git manager for one project checkout
pub struct GitManager {
    root: PathBuf,
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Open the repository whose main worktree is `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let repo = Repository::open(&root)?;
        Ok(Self { root, repo })
    }

    /// Project root (the main worktree)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the repository's .git path
    pub fn repo_path(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    /// Run git in the project root, failing on a non-zero exit
    pub fn run(&self, args: &[&str]) -> Result<String> {
        self.run_in(&self.root, args)
    }

    /// Run git in `dir`, failing on a non-zero exit
    pub fn run_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output_in(dir, args)?;
        if !output.success {
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Run git in `dir` and hand back the outcome, whatever the exit status
    pub fn output_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        log::debug!("[Git] git {} (in {})", args.join(" "), dir.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| Error::Git(format!("failed to run git {}: {}", args.join(" "), e)))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
