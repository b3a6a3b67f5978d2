//! Merge execution
//!
//! Lands one branch on the target branch under the merge lock, escalating
//! from fast-forward to rebase to a merge commit, then pushes, verifies the
//! remote and cleans up.

mod cleanup;
mod engine;

pub use cleanup::{cleanup_after_merge, CleanupReport};
pub use engine::{MergeEngine, MergeOutcome, MergeRequest, MergeTier};
