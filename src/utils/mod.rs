// Utility functions

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{Error, Result};
use crate::file_storage::get_integrator_dir;

// =============================================================================
// Path Helpers - one place for every runtime file under .integrator/
// =============================================================================

/// Get the .integrator/config.yaml path for a project.
#[inline]
pub fn config_path(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("config.yaml")
}

/// Lock serializing queue document mutations.
#[inline]
pub fn queue_lock_path(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("merge-queue.lock")
}

/// Lock serializing integration attempts (daemon and manual merges).
#[inline]
pub fn merge_lock_path(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("merge.lock")
}

/// Lock serializing read-modify-write of one operation document.
#[inline]
pub fn operation_lock_path(project_path: &Path, name: &str) -> PathBuf {
    crate::file_storage::operations::get_operation_dir(project_path, name).join(".lock")
}

/// Pid file of the running merge queue daemon.
#[inline]
pub fn daemon_pid_path(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("merge-queue.pid")
}

/// Directory for throwaway worktrees used to rebase branch-only merges.
#[inline]
pub fn scratch_dir(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("scratch")
}

/// Directory holding agent session pid files.
#[inline]
pub fn sessions_dir(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("sessions")
}

// =============================================================================
// Names
// =============================================================================

/// Operation names become directory names, so keep them to a safe alphabet.
pub fn validate_name(name: &str) -> Result<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._-]+$").unwrap_or_else(|e| unreachable!("{}", e))
    });

    if name == "." || name == ".." || !pattern.is_match(name) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Flatten a branch name into something usable as a single path component.
///
/// `feature/login` becomes `feature-login`.
pub fn sanitize_branch_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect()
}

// =============================================================================
// Mutex Helpers
// =============================================================================

/// Lock a mutex, recovering from poisoning.
///
/// Used for in-process state where a panicked holder cannot leave the data
/// half-written (flags and small collections).
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("[Utils] Recovering from poisoned mutex");
        poisoned.into_inner()
    })
}
