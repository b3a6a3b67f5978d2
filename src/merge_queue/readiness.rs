//! Readiness predicate for queue entries
//!
//! Evaluation only reads: the operation document, the filesystem, git refs,
//! agent liveness and the tracker. Whatever follows from a verdict (flags,
//! agent wake-ups) is the scheduler's business.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::agents::AgentSessions;
use crate::error::Result;
use crate::git::GitManager;
use crate::lifecycle::reference_resolved;
use crate::models::{HoldReason, MergeType, Operation, Phase, QueueEntry};
use crate::tracker::IssueTracker;

/// Why an entry can or cannot be merged right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    OperationMissing,
    NotRequested,
    NotExecuting(Phase),
    Held(Option<HoldReason>),
    WorktreeMissing(PathBuf),
    AgentRunning,
    /// Unresolved `blocked_by` references
    Blocked(Vec<String>),
    /// Open issues found for the operation's labels or its `issue_id`
    OpenIssues(Vec<String>),
    BranchMissing(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    /// One line for `last_message` and logs
    pub fn message(&self) -> String {
        match self {
            Readiness::Ready => "ready to merge".to_string(),
            Readiness::OperationMissing => "operation document not found".to_string(),
            Readiness::NotRequested => "operation has not requested a merge".to_string(),
            Readiness::NotExecuting(phase) => {
                format!("operation is {}, waiting for executing", phase)
            }
            Readiness::Held(Some(HoldReason::Blocked)) => {
                "operation is held until its blockers resolve".to_string()
            }
            Readiness::Held(_) => "operation is held".to_string(),
            Readiness::WorktreeMissing(path) => format!(
                "worktree {} is missing; recreate the worktree and re-enqueue",
                path.display()
            ),
            Readiness::AgentRunning => "agent session is still running".to_string(),
            Readiness::Blocked(refs) => format!("blocked by {}", refs.join(", ")),
            Readiness::OpenIssues(ids) => format!("open issues: {}", ids.join(", ")),
            Readiness::BranchMissing(branch) => format!("branch {} does not exist", branch),
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Collaborators readiness reads from
pub struct ReadinessContext<'a> {
    pub project_path: &'a Path,
    pub tracker: &'a dyn IssueTracker,
    pub sessions: &'a dyn AgentSessions,
    pub git: &'a GitManager,
}

/// Evaluate one entry. `operation` is the entry's operation document, if
/// any; branch entries ignore it.
pub fn evaluate(
    ctx: &ReadinessContext<'_>,
    entry: &QueueEntry,
    operation: Option<&Operation>,
) -> Result<Readiness> {
    match entry.merge_type {
        MergeType::Branch => Ok(evaluate_branch(ctx, entry)),
        MergeType::Operation => match operation {
            Some(op) => evaluate_operation(ctx, entry, op),
            None => Ok(Readiness::OperationMissing),
        },
    }
}

fn evaluate_branch(ctx: &ReadinessContext<'_>, entry: &QueueEntry) -> Readiness {
    if !ctx.git.branch_exists(&entry.operation) {
        return Readiness::BranchMissing(entry.operation.clone());
    }
    match entry.worktree {
        Some(ref path) if !path.exists() => Readiness::WorktreeMissing(path.clone()),
        _ => Readiness::Ready,
    }
}

fn evaluate_operation(
    ctx: &ReadinessContext<'_>,
    entry: &QueueEntry,
    op: &Operation,
) -> Result<Readiness> {
    if !op.merge_requested {
        return Ok(Readiness::NotRequested);
    }
    if op.phase != Phase::Executing {
        return Ok(Readiness::NotExecuting(op.phase));
    }
    if op.held {
        return Ok(Readiness::Held(op.hold_reason));
    }

    if !op.worktree.exists() {
        return Ok(Readiness::WorktreeMissing(op.worktree.clone()));
    }

    if ctx.sessions.is_running(op)? {
        return Ok(Readiness::AgentRunning);
    }

    let mut unresolved = Vec::new();
    for reference in &op.blocked_by {
        if !reference_resolved(ctx.project_path, ctx.tracker, reference)? {
            unresolved.push(reference.clone());
        }
    }
    if !unresolved.is_empty() {
        return Ok(Readiness::Blocked(unresolved));
    }

    let mut open = ctx.tracker.open_issues(&op.issue_labels())?;
    if let Some(ref issue) = entry.issue_id {
        if !open.contains(issue) && !ctx.tracker.is_closed(issue)? {
            open.push(issue.clone());
        }
    }
    if !open.is_empty() {
        open.sort();
        return Ok(Readiness::OpenIssues(open));
    }

    Ok(Readiness::Ready)
}
