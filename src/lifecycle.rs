//! Operation lifecycle
//!
//! The only writer of `phase`, `merge_commit` and the hold overlay. Every
//! update is a full read-modify-write of the operation document under that
//! operation's lock, followed by an event log append.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::IntegratorConfig;
use crate::error::{Error, Result};
use crate::file_storage::operations::{
    append_event, delete_operation, list_operations, read_events, read_operation,
    write_operation, EventRecord,
};
use crate::lock::FileLock;
use crate::models::state_machine::{StateTransitionError, TransitionTable};
use crate::models::{HoldReason, Operation, Phase};
use crate::tracker::IssueTracker;
use crate::utils::{operation_lock_path, validate_name};

/// What a workflow supplies when it starts an operation
#[derive(Debug, Clone, Default)]
pub struct OperationSpec {
    pub name: String,
    pub branch: String,
    pub worktree: PathBuf,
    pub epic_id: Option<String>,
    pub blocked_by: Vec<String>,
    pub labels: Vec<String>,
}

/// Result of recording a merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRecord {
    pub operation: Operation,
    /// Dependents left with no blockers and no hold
    pub released: Vec<String>,
}

pub struct OperationLifecycle {
    project_path: PathBuf,
    tracker: Arc<dyn IssueTracker>,
    lock_wait: Duration,
    hold_after_plan: bool,
}

impl OperationLifecycle {
    pub fn new(project_path: &Path, tracker: Arc<dyn IssueTracker>, config: &IntegratorConfig) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            tracker,
            lock_wait: config.lock_wait(),
            hold_after_plan: config.hold_after_plan,
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Create a new operation in `init`
    pub fn create(&self, spec: OperationSpec) -> Result<Operation> {
        validate_name(&spec.name)?;
        if spec.branch.trim().is_empty() {
            return Err(Error::InvalidName(spec.branch));
        }

        let operation = {
            let _guard = self.lock(&spec.name)?;
            if read_operation(&self.project_path, &spec.name)
                .map_err(Error::Storage)?
                .is_some()
            {
                return Err(Error::OperationExists(spec.name));
            }

            let mut operation = Operation::new(&spec.name, &spec.branch, spec.worktree);
            operation.epic_id = spec.epic_id;
            operation.labels = spec.labels;
            for reference in spec.blocked_by {
                if reference == operation.name {
                    log::warn!(
                        "[Lifecycle] Ignoring self-reference in blocked_by of {}",
                        operation.name
                    );
                    continue;
                }
                operation.blocked_by.insert(reference);
            }

            write_operation(&self.project_path, &operation).map_err(Error::Storage)?;
            self.record_event(&operation.name, EventRecord::new("created"));
            log::info!(
                "[Lifecycle] Created operation {} on branch {}",
                operation.name,
                operation.branch
            );
            operation
        };

        if operation.blocked_by.is_empty() {
            Ok(operation)
        } else {
            self.refresh_blocks(&operation.name)
        }
    }

    /// Move an operation to `to` along the phase graph
    pub fn transition(&self, name: &str, to: Phase) -> Result<Operation> {
        let hold_after_plan = self.hold_after_plan;
        self.modify(name, |op| {
            let from = op.phase;
            TransitionTable::standard().transition(from, to)?;
            if to == Phase::Merged {
                return Err(StateTransitionError::RequiresMergeRecord(to).into());
            }

            op.phase = to;
            let mut events = vec![EventRecord::transition(from, to)];

            if to.is_terminal() {
                op.held = false;
                op.hold_reason = None;
                op.merge_requested = false;
            } else if to == Phase::Planned && hold_after_plan && !op.held {
                op.held = true;
                op.hold_reason = Some(HoldReason::Manual);
                events.push(EventRecord::new("hold").with_detail("after plan"));
            }

            log::info!("[Lifecycle] {}: {} -> {}", op.name, from, to);
            Ok(events)
        })
    }

    /// Record a landed merge, close the epic, then release dependents.
    ///
    /// The steps run in that order. When closing the epic fails the error is
    /// returned with the merge already recorded; `release_dependents` (or a
    /// repeated `record_merge` with the same commit) finishes the job.
    pub fn record_merge(&self, name: &str, commit: &str) -> Result<MergeRecord> {
        let commit = commit.trim();
        if commit.is_empty() {
            return Err(Error::Git(format!("empty merge commit for {}", name)));
        }

        let existing = self.require(name)?;
        let operation = if existing.phase == Phase::Merged
            && existing.merge_commit.as_deref() == Some(commit)
        {
            log::info!("[Lifecycle] {} already recorded as merged at {}", name, commit);
            existing
        } else {
            self.modify(name, |op| {
                let from = op.phase;
                TransitionTable::standard().transition(from, Phase::Merged)?;
                op.phase = Phase::Merged;
                op.merge_commit = Some(commit.to_string());
                op.held = false;
                op.hold_reason = None;
                op.merge_requested = false;
                log::info!("[Lifecycle] {} merged at {}", op.name, commit);
                Ok(vec![
                    EventRecord::transition(from, Phase::Merged).with_detail(commit)
                ])
            })?
        };

        if let Some(ref epic) = operation.epic_id {
            self.tracker
                .close_issue(epic, &format!("merged as {}", commit))?;
            self.record_event(name, EventRecord::new("epic_closed").with_detail(epic.as_str()));
        }

        let released = self.release_dependents(name)?;
        Ok(MergeRecord {
            operation,
            released,
        })
    }

    /// Clear a merged operation from its dependents' `blocked_by`.
    ///
    /// Refuses to run until the operation is merged and its epic is closed.
    pub fn release_dependents(&self, name: &str) -> Result<Vec<String>> {
        let blocker = self.require(name)?;
        if blocker.phase != Phase::Merged {
            return Err(StateTransitionError::InvalidTransition {
                from: blocker.phase,
                to: Phase::Merged,
            }
            .into());
        }
        if let Some(ref epic) = blocker.epic_id {
            if !self.tracker.is_closed(epic)? {
                return Err(Error::Tracker(format!(
                    "epic {} of {} is not closed yet",
                    epic, name
                )));
            }
        }

        let mut released = Vec::new();
        let dependents: Vec<String> = list_operations(&self.project_path)
            .map_err(Error::Storage)?
            .into_iter()
            .filter(|op| {
                op.name != blocker.name
                    && (op.blocked_by.contains(&blocker.name)
                        || blocker
                            .epic_id
                            .as_ref()
                            .map(|e| op.blocked_by.contains(e))
                            .unwrap_or(false))
            })
            .map(|op| op.name)
            .collect();

        for dependent in dependents {
            let updated = self.modify(&dependent, |op| {
                let mut events = Vec::new();
                for reference in [Some(&blocker.name), blocker.epic_id.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    if op.blocked_by.remove(reference) {
                        events.push(EventRecord::new("unblock").with_detail(reference.as_str()));
                    }
                }
                events.extend(Self::reevaluate_hold(op));
                Ok(events)
            })?;

            log::info!("[Lifecycle] {} no longer blocked by {}", dependent, name);
            if updated.blocked_by.is_empty() && !updated.held && !updated.phase.is_terminal() {
                released.push(dependent);
            }
        }

        Ok(released)
    }

    /// Pause automatic progression without touching the phase
    pub fn hold(&self, name: &str) -> Result<Operation> {
        self.modify(name, |op| {
            if op.phase.is_terminal() {
                return Err(StateTransitionError::AlreadyTerminal(op.phase).into());
            }
            if op.held && op.hold_reason == Some(HoldReason::Manual) {
                return Ok(Vec::new());
            }
            op.held = true;
            op.hold_reason = Some(HoldReason::Manual);
            log::info!("[Lifecycle] Held {} in {}", op.name, op.phase);
            Ok(vec![EventRecord::new("hold").with_detail("manual")])
        })
    }

    /// Clear the hold; execution continues from the same phase
    pub fn resume(&self, name: &str) -> Result<Operation> {
        self.modify(name, |op| {
            if op.phase.is_terminal() {
                return Err(StateTransitionError::AlreadyTerminal(op.phase).into());
            }
            if !op.held {
                return Ok(Vec::new());
            }
            op.held = false;
            op.hold_reason = None;
            log::info!("[Lifecycle] Resumed {} in {}", op.name, op.phase);
            Ok(vec![EventRecord::new("resume")])
        })
    }

    /// Drop resolved `blocked_by` references and re-evaluate the hold
    pub fn refresh_blocks(&self, name: &str) -> Result<Operation> {
        let current = self.require(name)?;
        if current.phase.is_terminal() {
            return Ok(current);
        }

        // Resolve outside the lock; resolution reads other documents and the tracker
        let mut resolved = Vec::new();
        for reference in &current.blocked_by {
            if reference_resolved(&self.project_path, self.tracker.as_ref(), reference)? {
                resolved.push(reference.clone());
            }
        }

        self.modify(name, |op| {
            if op.phase.is_terminal() {
                return Ok(Vec::new());
            }
            let mut events = Vec::new();
            for reference in &resolved {
                if op.blocked_by.remove(reference) {
                    events.push(EventRecord::new("unblock").with_detail(reference.as_str()));
                }
            }
            events.extend(Self::reevaluate_hold(op));
            Ok(events)
        })
    }

    /// Mark or unmark an operation as queued for merge
    pub fn request_merge(&self, name: &str, requested: bool) -> Result<Operation> {
        self.modify(name, |op| {
            if requested && op.phase.is_terminal() {
                return Err(StateTransitionError::AlreadyTerminal(op.phase).into());
            }
            if op.merge_requested == requested {
                return Ok(Vec::new());
            }
            op.merge_requested = requested;
            let kind = if requested {
                "merge_requested"
            } else {
                "merge_request_cleared"
            };
            Ok(vec![EventRecord::new(kind)])
        })
    }

    /// Get an operation; absence is not an error
    pub fn get(&self, name: &str) -> Result<Option<Operation>> {
        validate_name(name)?;
        read_operation(&self.project_path, name).map_err(Error::Storage)
    }

    /// One document field as text; absence is not an error
    pub fn field(&self, name: &str, field: &str) -> Result<Option<String>> {
        Ok(self.get(name)?.and_then(|op| op.field(field)))
    }

    pub fn list(&self) -> Result<Vec<Operation>> {
        list_operations(&self.project_path).map_err(Error::Storage)
    }

    pub fn events(&self, name: &str) -> Result<Vec<EventRecord>> {
        validate_name(name)?;
        read_events(&self.project_path, name).map_err(Error::Storage)
    }

    /// Delete an operation. Live operations need `force`.
    pub fn prune(&self, name: &str, force: bool) -> Result<bool> {
        validate_name(name)?;
        let _guard = self.lock(name)?;
        match read_operation(&self.project_path, name).map_err(Error::Storage)? {
            None => Ok(false),
            Some(op) if !op.phase.is_terminal() && !force => {
                Err(StateTransitionError::InvalidTransition {
                    from: op.phase,
                    to: Phase::Cancelled,
                }
                .into())
            }
            Some(_) => {
                let removed = delete_operation(&self.project_path, name).map_err(Error::Storage)?;
                log::info!("[Lifecycle] Pruned operation {}", name);
                Ok(removed)
            }
        }
    }

    fn lock(&self, name: &str) -> Result<crate::lock::LockGuard> {
        FileLock::new(operation_lock_path(&self.project_path, name), "operation update")
            .acquire_within(self.lock_wait)
    }

    fn require(&self, name: &str) -> Result<Operation> {
        self.get(name)?
            .ok_or_else(|| Error::OperationNotFound(name.to_string()))
    }

    /// Locked read-modify-write; `update` returns the events to log.
    /// Nothing is written when `update` fails or changes nothing.
    fn modify<F>(&self, name: &str, update: F) -> Result<Operation>
    where
        F: FnOnce(&mut Operation) -> Result<Vec<EventRecord>>,
    {
        validate_name(name)?;
        let _guard = self.lock(name)?;

        let original = read_operation(&self.project_path, name)
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::OperationNotFound(name.to_string()))?;

        let mut operation = original.clone();
        let events = update(&mut operation)?;
        if operation == original {
            return Ok(original);
        }

        operation.updated_at = Utc::now();
        write_operation(&self.project_path, &operation).map_err(Error::Storage)?;

        for event in events {
            self.record_event(name, event);
        }
        Ok(operation)
    }

    fn record_event(&self, name: &str, event: EventRecord) {
        if let Err(e) = append_event(&self.project_path, name, &event) {
            log::warn!("[Lifecycle] Failed to log {} event for {}: {}", event.kind, name, e);
        }
    }

    /// Hold on remaining blockers, release a blocker hold once none remain
    fn reevaluate_hold(op: &mut Operation) -> Vec<EventRecord> {
        if op.phase.is_terminal() {
            return Vec::new();
        }
        if op.blocked_by.is_empty() {
            if op.held && op.hold_reason == Some(HoldReason::Blocked) {
                op.held = false;
                op.hold_reason = None;
                return vec![EventRecord::new("resume").with_detail("blockers resolved")];
            }
        } else if !op.held {
            op.held = true;
            op.hold_reason = Some(HoldReason::Blocked);
            return vec![EventRecord::new("hold").with_detail("blocked")];
        }
        Vec::new()
    }
}

/// Whether a `blocked_by` reference no longer blocks.
///
/// An operation reference resolves once that operation is merged and its
/// epic (if any) is closed; any other reference is an issue id that
/// resolves once the tracker reports it closed.
pub fn reference_resolved(
    project_path: &Path,
    tracker: &dyn IssueTracker,
    reference: &str,
) -> Result<bool> {
    let blocker = if validate_name(reference).is_ok() {
        read_operation(project_path, reference).map_err(Error::Storage)?
    } else {
        None
    };

    match blocker {
        Some(op) => {
            if op.phase != Phase::Merged {
                return Ok(false);
            }
            match op.epic_id {
                Some(ref epic) => tracker.is_closed(epic),
                None => Ok(true),
            }
        }
        None => tracker.is_closed(reference),
    }
}
