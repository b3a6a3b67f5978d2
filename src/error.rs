//! Library error type
//!
//! Every failure the queue, the lifecycle and the merge engine can surface.
//! Callers show `Display` together with [`Error::remediation`]; there is a
//! single failure exit code, so the message is what tells causes apart.

use std::path::PathBuf;

use crate::models::state_machine::StateTransitionError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Lock {path:?} is held by {holder}")]
    LockHeld {
        path: PathBuf,
        holder: String,
        /// The pid named in the lock file is no longer running
        holder_dead: bool,
    },

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Operation already exists: {0}")]
    OperationExists(String),

    #[error("Queue entry not found: {0}")]
    EntryNotFound(String),

    #[error("Queue entry already active: {0}")]
    DuplicateEntry(String),

    #[error("{name} is not ready to merge: {reason}")]
    NotReady { name: String, reason: String },

    #[error("Invalid name '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidName(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Merge commit {commit} is not reachable from {target}")]
    VerificationFailed { commit: String, target: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Issue tracker error: {0}")]
    Tracker(String),

    #[error("Agent session error: {0}")]
    Session(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Action an operator can take to get past this failure.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Error::LockHeld {
                path, holder_dead, ..
            } => Some(if *holder_dead {
                format!("remove stale lock at {}", path.display())
            } else {
                "wait for the current holder to finish, then re-run".to_string()
            }),
            Error::InvalidTransition(_) => {
                Some("check the phase with `integrator op show <name>`".to_string())
            }
            Error::OperationNotFound(_) => {
                Some("list known operations with `integrator op list`".to_string())
            }
            Error::EntryNotFound(_) => {
                Some("list queue entries with `integrator queue list`".to_string())
            }
            Error::DuplicateEntry(name) => Some(format!(
                "wait for the active entry or re-run with `integrator queue retry {}`",
                name
            )),
            Error::NotReady { name, .. } => Some(format!(
                "address the reason above, then re-run `integrator queue merge {}`",
                name
            )),
            Error::VerificationFailed { .. } => Some(
                "inspect the remote target branch, then re-run with `integrator queue retry <name>`"
                    .to_string(),
            ),
            Error::Git(_) => Some("re-run with `integrator queue retry <name>`".to_string()),
            _ => None,
        }
    }

    /// Contention and tool failures that the next daemon cycle may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::LockHeld { .. } | Error::Git(_) | Error::Io(_))
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Git(err.message().to_string())
    }
}

/// Result type alias for integrator operations.
pub type Result<T> = std::result::Result<T, Error>;
