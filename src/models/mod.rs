// Data models for operation documents and merge queue entries

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle phase of an operation
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Planned,
    Queued,
    Executing,
    Merged,
    Cancelled,
    Failed,
}

impl Phase {
    /// Returns all phases in graph order
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Init,
            Phase::Planned,
            Phase::Queued,
            Phase::Executing,
            Phase::Merged,
            Phase::Cancelled,
            Phase::Failed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Planned => "planned",
            Phase::Queued => "queued",
            Phase::Executing => "executing",
            Phase::Merged => "merged",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        }
    }

    /// No transition leaves a terminal phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Merged | Phase::Cancelled | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .iter()
            .find(|p| p.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

/// Why an operation is held
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// User request or the automatic hold after planning
    Manual,
    /// Waiting on unresolved `blocked_by` references
    Blocked,
}

/// A tracked unit of agent work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub held: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<HoldReason>,
    pub worktree: PathBuf,
    pub branch: String,
    #[serde(default)]
    pub epic_id: Option<String>,
    #[serde(default)]
    pub merge_commit: Option<String>,
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    /// Flagged for the merge queue
    #[serde(default)]
    pub merge_requested: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(name: &str, branch: &str, worktree: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            phase: Phase::Init,
            held: false,
            hold_reason: None,
            worktree,
            branch: branch.to_string(),
            epic_id: None,
            merge_commit: None,
            blocked_by: BTreeSet::new(),
            merge_requested: false,
            labels: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Labels used to find the operation's issues in the tracker
    pub fn issue_labels(&self) -> Vec<String> {
        let mut labels = vec![format!("op:{}", self.name)];
        for label in &self.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }

    /// `merge_commit` is set exactly when the phase is merged
    pub fn validate(&self) -> Result<(), String> {
        match (self.phase, &self.merge_commit) {
            (Phase::Merged, None) => Err(format!(
                "Operation '{}' is merged but has no merge commit",
                self.name
            )),
            (phase, Some(_)) if phase != Phase::Merged => Err(format!(
                "Operation '{}' has a merge commit while in phase {}",
                self.name, phase
            )),
            _ if self.held && self.phase.is_terminal() => Err(format!(
                "Operation '{}' is held in terminal phase {}",
                self.name, self.phase
            )),
            _ => Ok(()),
        }
    }

    /// Look up a field by its document key, rendered as text
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "phase" => Some(self.phase.to_string()),
            "held" => Some(self.held.to_string()),
            "worktree" => Some(self.worktree.display().to_string()),
            "branch" => Some(self.branch.clone()),
            "epic_id" => self.epic_id.clone(),
            "merge_commit" => self.merge_commit.clone(),
            "blocked_by" => Some(
                self.blocked_by
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            "merge_requested" => Some(self.merge_requested.to_string()),
            "created_at" => Some(self.created_at.to_rfc3339()),
            "updated_at" => Some(self.updated_at.to_rfc3339()),
            _ => None,
        }
    }
}

/// Queue entry status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflict,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Conflict => "conflict",
        }
    }

    /// Entries the daemon is still responsible for
    pub fn is_active(&self) -> bool {
        matches!(self, EntryStatus::Pending | EntryStatus::Processing)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a queue entry integrates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    /// A tracked operation's branch
    Operation,
    /// A raw branch with no operation document
    Branch,
}

/// One merge request in the queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    /// Operation name, or the branch name for branch merges
    pub operation: String,
    pub worktree: Option<PathBuf>,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub merge_type: MergeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default)]
    pub merge_resumed: bool,
    #[serde(default)]
    pub worktree_missing: bool,
    #[serde(default)]
    pub conflict_retried: bool,
    /// Transient failures so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        name: &str,
        worktree: Option<PathBuf>,
        priority: i32,
        merge_type: MergeType,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation: name.to_string(),
            worktree,
            priority,
            enqueued_at: now,
            status: EntryStatus::Pending,
            merge_type,
            issue_id: None,
            merge_resumed: false,
            worktree_missing: false,
            conflict_retried: false,
            attempts: 0,
            last_message: None,
            updated_at: now,
        }
    }

    /// Scheduling order: lower priority first, then FIFO
    pub fn sort_key(&self) -> (i32, DateTime<Utc>) {
        (self.priority, self.enqueued_at)
    }

    /// Set the status and clear the transient flags tied to a fresh attempt
    pub fn reset_to_pending(&mut self) {
        self.status = EntryStatus::Pending;
        self.conflict_retried = false;
        self.merge_resumed = false;
        self.worktree_missing = false;
        self.attempts = 0;
        self.last_message = None;
        self.updated_at = Utc::now();
    }
}
