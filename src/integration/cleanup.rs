// Post-merge cleanup; failures here never undo a landed merge

use std::fs;
use std::path::Path;

use super::engine::MergeRequest;
use crate::git::GitManager;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub remote_branch_deleted: bool,
    pub warnings: Vec<String>,
}

/// Remove the worktree, local branch and remote branch of a landed request
pub fn cleanup_after_merge(
    git: &GitManager,
    request: &MergeRequest,
    remote: Option<&str>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let worktree = match request.worktree {
        Some(ref path) if path.exists() => Some(path.clone()),
        _ => git.worktree_for_branch(&request.branch).ok().flatten(),
    };
    if let Some(path) = worktree {
        if same_path(&path, git.root()) {
            report
                .warnings
                .push(format!("not removing project root {}", path.display()));
        } else {
            match git.remove_worktree(&path) {
                Ok(()) => report.worktree_removed = true,
                Err(e) => report.warnings.push(e.to_string()),
            }
        }
    } else if let Err(e) = git.prune_worktrees() {
        report.warnings.push(e.to_string());
    }

    if git.branch_exists(&request.branch) {
        match git.delete_branch(&request.branch) {
            Ok(()) => report.branch_deleted = true,
            Err(e) => report.warnings.push(e.to_string()),
        }
    }

    if let Some(remote) = remote {
        match git.remote_branch_exists(remote, &request.branch) {
            Ok(true) => match git.delete_remote_branch(remote, &request.branch) {
                Ok(()) => report.remote_branch_deleted = true,
                Err(e) => report.warnings.push(e.to_string()),
            },
            Ok(false) => {}
            Err(e) => report.warnings.push(e.to_string()),
        }
    }

    for warning in &report.warnings {
        log::warn!("[MergeEngine] Cleanup of {}: {}", request.name, warning);
    }
    report
}

/// Remove a scratch worktree used for a rebase
pub(crate) fn remove_scratch_worktree(git: &GitManager, path: &Path) {
    if let Err(e) = git.remove_worktree(path) {
        log::warn!("[MergeEngine] Failed to remove scratch worktree: {}", e);
        if let Err(e) = fs::remove_dir_all(path) {
            log::warn!("[MergeEngine] Failed to delete {}: {}", path.display(), e);
        }
        let _ = git.prune_worktrees();
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
