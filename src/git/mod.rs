//! Git operations
//!
//! Mutating and network operations run the `git` binary so they behave
//! exactly like a developer's own commands (hooks, credentials, config).
//! Inspection and ancestry checks go through git2.
//!
//! - `manager` - GitManager and the command runner
//! - `branches` - Branch lookup, checkout and deletion
//! - `worktrees` - Worktree add, remove and listing
//! - `merge` - Fast-forward, rebase and merge-commit attempts
//! - `remote` - Fetch, pull, push and remote verification
//! - `types` - Shared data structures

mod branches;
mod manager;
mod merge;
mod remote;
#[cfg(test)]
mod tests;
mod types;
mod worktrees;

pub use manager::GitManager;
pub use types::{GitOutput, MergeAttempt, WorktreeInfo};
