//! Git data types and structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Captured output of one `git` invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Represents a git worktree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` for a detached HEAD
    pub branch: Option<String>,
}

/// Outcome of a merge-commit attempt on the target branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// Merge commit created; the id of the new HEAD
    Merged(String),
    /// Conflicted and aborted; the tree is back at the pre-merge HEAD
    Conflict(Vec<String>),
}
