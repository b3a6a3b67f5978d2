//! One daemon cycle: purge, retry, pick the first ready entry, merge it.
//!
//! The context owns every collaborator so nothing reaches for globals.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::readiness::{evaluate, Readiness, ReadinessContext};
use super::QueueStore;
use crate::agents::{AgentSessions, ProcessSessions};
use crate::config::IntegratorConfig;
use crate::error::{Error, Result};
use crate::git::GitManager;
use crate::integration::{MergeEngine, MergeOutcome, MergeRequest, MergeTier};
use crate::lifecycle::OperationLifecycle;
use crate::lock::FileLock;
use crate::models::{EntryStatus, MergeType, Operation, Phase, QueueEntry};
use crate::tracker::{self, IssueTracker};
use crate::utils::merge_lock_path;

/// Lock holder recorded by the daemon
pub const DAEMON_HOLDER: &str = "merge-queue daemon";

/// Lock holder recorded by `queue merge`
pub const MANUAL_HOLDER: &str = "manual merge";

/// What happened to the entry a cycle selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed { commit: String, tier: MergeTier },
    Conflict { files: Vec<String> },
    Failed { message: String },
    /// Transient failure; the entry is pending again
    Requeued { attempts: u32, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub purged: Vec<String>,
    /// Conflict entries given their one automatic retry
    pub retried: Vec<String>,
    /// Entry left `processing` by an earlier daemon; the cycle stopped there
    pub stalled: Option<String>,
    /// Pending entries that were not ready, with the reason
    pub waiting: Vec<(String, String)>,
    pub selected: Option<String>,
    pub outcome: Option<CycleOutcome>,
    /// Dependents whose agents were woken after a merge
    pub resumed: Vec<String>,
}

pub struct SchedulerContext {
    project_path: PathBuf,
    config: IntegratorConfig,
    store: QueueStore,
    lifecycle: OperationLifecycle,
    tracker: Arc<dyn IssueTracker>,
    sessions: Arc<dyn AgentSessions>,
    engine: MergeEngine,
}

impl SchedulerContext {
    pub fn new(
        project_path: &Path,
        config: IntegratorConfig,
        tracker: Arc<dyn IssueTracker>,
        sessions: Arc<dyn AgentSessions>,
    ) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            store: QueueStore::new(project_path, config.lock_wait()),
            lifecycle: OperationLifecycle::new(project_path, tracker.clone(), &config),
            engine: MergeEngine::new(project_path, &config, DAEMON_HOLDER),
            tracker,
            sessions,
            config,
        }
    }

    /// Context with the configured tracker and process-backed sessions
    pub fn from_config(project_path: &Path, config: IntegratorConfig) -> Self {
        let tracker = tracker::from_config(&config.tracker, project_path);
        let sessions: Arc<dyn AgentSessions> = Arc::new(ProcessSessions::new(
            project_path,
            config.agent.resume_command.clone(),
        ));
        Self::new(project_path, config, tracker, sessions)
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &OperationLifecycle {
        &self.lifecycle
    }

    /// Run one daemon cycle
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let git = GitManager::new(&self.project_path)?;

        report.purged = self.purge(&git)?;
        report.retried = self.retry_conflicts()?;

        let entries = self.store.list()?;
        if let Some(stuck) = entries.iter().find(|e| e.status == EntryStatus::Processing) {
            log::warn!(
                "[MergeQueue] {} is still processing from an earlier run; \
                 check the target branch, then run `integrator queue retry {}`",
                stuck.operation,
                stuck.operation
            );
            report.stalled = Some(stuck.operation.clone());
            return Ok(report);
        }

        let mut selected = None;
        for entry in entries.iter().filter(|e| e.status == EntryStatus::Pending) {
            let operation = self.current_operation(entry)?;
            let verdict = match self.readiness(&git, entry, operation.as_ref()) {
                Ok(verdict) => verdict,
                Err(e) => {
                    log::warn!("[MergeQueue] Could not evaluate {}: {}", entry.operation, e);
                    self.note(&entry.operation, e.to_string());
                    report.waiting.push((entry.operation.clone(), e.to_string()));
                    continue;
                }
            };

            if verdict.is_ready() {
                selected = Some((entry.clone(), operation));
                break;
            }
            let message = self.handle_not_ready(entry, operation.as_ref(), &verdict);
            report.waiting.push((entry.operation.clone(), message));
        }

        let Some((entry, operation)) = selected else {
            log::debug!("[MergeQueue] No entry ready this cycle");
            return Ok(report);
        };

        report.selected = Some(entry.operation.clone());
        let outcome = self.land(&self.engine, &entry, operation.as_ref(), &mut report.resumed)?;
        report.outcome = Some(outcome);
        Ok(report)
    }

    /// Merge one entry now, outside the daemon. Readiness still applies; the
    /// merge lock keeps it from overlapping a daemon merge.
    pub fn merge_now(&self, name: &str) -> Result<(CycleOutcome, Vec<String>)> {
        let entry = self
            .store
            .get(name)?
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        match entry.status {
            EntryStatus::Processing => {
                return Err(Error::NotReady {
                    name: name.to_string(),
                    reason: "entry is being processed".to_string(),
                })
            }
            EntryStatus::Completed => {
                return Err(Error::NotReady {
                    name: name.to_string(),
                    reason: "entry is already merged".to_string(),
                })
            }
            _ => {}
        }

        let git = GitManager::new(&self.project_path)?;
        let operation = self.current_operation(&entry)?;
        let verdict = self.readiness(&git, &entry, operation.as_ref())?;
        if !verdict.is_ready() {
            return Err(Error::NotReady {
                name: name.to_string(),
                reason: verdict.message(),
            });
        }

        // Fail fast instead of marking the entry processing behind a daemon merge
        drop(FileLock::new(merge_lock_path(&self.project_path), MANUAL_HOLDER).try_acquire()?);

        let engine = MergeEngine::new(&self.project_path, &self.config, MANUAL_HOLDER);
        let mut resumed = Vec::new();
        let outcome = self.land(&engine, &entry, operation.as_ref(), &mut resumed)?;
        Ok((outcome, resumed))
    }

    /// Drop entries whose work is gone or finished
    fn purge(&self, git: &GitManager) -> Result<Vec<String>> {
        let mut doomed = Vec::new();
        for entry in self.store.list()? {
            let reason = match entry.merge_type {
                MergeType::Operation => match self.lifecycle.get(&entry.operation)? {
                    None => Some("operation no longer exists".to_string()),
                    Some(op) if op.phase == Phase::Merged => {
                        if self.merge_landed(git, &op) {
                            Some("operation is merged".to_string())
                        } else {
                            let message = format!(
                                "{} is marked merged but {} is not on {}; check the target branch",
                                op.name,
                                op.merge_commit.as_deref().unwrap_or("its merge commit"),
                                self.config.target_branch
                            );
                            log::warn!("[MergeQueue] Keeping {}: {}", entry.operation, message);
                            self.note(&entry.operation, message);
                            None
                        }
                    }
                    Some(op) if op.phase.is_terminal() => Some(format!("operation is {}", op.phase)),
                    Some(_) => None,
                },
                MergeType::Branch => {
                    if entry.status == EntryStatus::Completed && !git.branch_exists(&entry.operation) {
                        Some("branch merged and deleted".to_string())
                    } else {
                        None
                    }
                }
            };
            if let Some(reason) = reason {
                log::info!("[MergeQueue] Purging {}: {}", entry.operation, reason);
                doomed.push(entry.operation);
            }
        }

        if doomed.is_empty() {
            return Ok(doomed);
        }
        self.store.mutate(|queue| {
            queue.entries.retain(|e| !doomed.contains(&e.operation));
            Ok(())
        })?;
        Ok(doomed)
    }

    /// Whether a merged operation's commit is contained in the target tip:
    /// the remote-tracking ref when there is a remote, else the local branch
    fn merge_landed(&self, git: &GitManager, op: &Operation) -> bool {
        let Some(ref commit) = op.merge_commit else {
            return false;
        };
        let target = &self.config.target_branch;
        let tip = match self.config.remote {
            Some(ref remote) => git.remote_tip(remote, target),
            None => git.branch_tip(target),
        };
        match tip.and_then(|tip| git.is_ancestor(commit, &tip)) {
            Ok(landed) => landed,
            Err(e) => {
                log::warn!("[MergeQueue] Could not check {} against {}: {}", commit, target, e);
                false
            }
        }
    }

    /// Give each conflicted entry one more try, since the target has moved
    fn retry_conflicts(&self) -> Result<Vec<String>> {
        self.store.mutate(|queue| {
            let mut retried = Vec::new();
            for entry in queue.entries.iter_mut() {
                if entry.status == EntryStatus::Conflict && !entry.conflict_retried {
                    entry.status = EntryStatus::Pending;
                    entry.conflict_retried = true;
                    entry.updated_at = chrono::Utc::now();
                    log::info!("[MergeQueue] Retrying {} once after conflict", entry.operation);
                    retried.push(entry.operation.clone());
                }
            }
            Ok(retried)
        })
    }

    /// The entry's operation with externally resolved blockers dropped
    fn current_operation(&self, entry: &QueueEntry) -> Result<Option<Operation>> {
        if entry.merge_type != MergeType::Operation {
            return Ok(None);
        }
        let Some(op) = self.lifecycle.get(&entry.operation)? else {
            return Ok(None);
        };
        if op.blocked_by.is_empty() || op.phase.is_terminal() {
            return Ok(Some(op));
        }
        match self.lifecycle.refresh_blocks(&op.name) {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(e) => {
                log::warn!("[MergeQueue] Could not refresh blockers of {}: {}", op.name, e);
                Ok(Some(op))
            }
        }
    }

    fn readiness(
        &self,
        git: &GitManager,
        entry: &QueueEntry,
        operation: Option<&Operation>,
    ) -> Result<Readiness> {
        let ctx = ReadinessContext {
            project_path: &self.project_path,
            tracker: self.tracker.as_ref(),
            sessions: self.sessions.as_ref(),
            git,
        };
        evaluate(&ctx, entry, operation)
    }

    /// Record a not-ready verdict and act on it; returns the recorded message
    fn handle_not_ready(
        &self,
        entry: &QueueEntry,
        operation: Option<&Operation>,
        verdict: &Readiness,
    ) -> String {
        let name = entry.operation.as_str();
        let mut message = verdict.message();

        match verdict {
            Readiness::WorktreeMissing(_) => {
                if !entry.worktree_missing {
                    log::warn!("[MergeQueue] {}: {}", name, message);
                }
                self.update_entry(name, |e| e.worktree_missing = true);
            }
            Readiness::OpenIssues(_) => match operation {
                Some(op) if !entry.merge_resumed => {
                    log::info!("[MergeQueue] {}: {}; resuming agent", name, message);
                    if let Err(e) = self.sessions.resume(op) {
                        log::warn!("[MergeQueue] Failed to resume agent for {}: {}", name, e);
                    }
                    self.update_entry(name, |e| e.merge_resumed = true);
                }
                _ => {
                    message = format!("{}; agent was already resumed, needs attention", message);
                    log::warn!("[MergeQueue] {}: {}", name, message);
                }
            },
            _ => log::info!("[MergeQueue] {} not ready: {}", name, message),
        }

        self.note(name, message.clone());
        message
    }

    /// Run the engine for a ready entry and record the result
    fn land(
        &self,
        engine: &MergeEngine,
        entry: &QueueEntry,
        operation: Option<&Operation>,
        resumed: &mut Vec<String>,
    ) -> Result<CycleOutcome> {
        let name = entry.operation.as_str();
        self.store.update(name, |e| {
            e.status = EntryStatus::Processing;
            e.worktree_missing = false;
            e.last_message = None;
        })?;

        let outcome = match MergeRequest::from_entry(entry, operation)
            .and_then(|request| engine.execute(&request))
        {
            Ok(MergeOutcome::Merged { commit, tier }) => {
                self.complete(entry, &commit, tier, resumed)
            }
            Ok(MergeOutcome::Conflict { files }) => {
                log::warn!(
                    "[MergeQueue] {} conflicts with {} in {}",
                    name,
                    engine.target_branch(),
                    files.join(", ")
                );
                let message = format!("conflict in {}", files.join(", "));
                self.finish(name, EntryStatus::Conflict, message);
                CycleOutcome::Conflict { files }
            }
            Err(e) if e.is_transient() => self.requeue(entry, &e),
            Err(e) => {
                log::error!("[MergeQueue] Merge of {} failed: {}", name, e);
                if let Some(hint) = e.remediation() {
                    log::error!("[MergeQueue] {}", hint.replace("<name>", name));
                }
                let message = e.to_string();
                self.finish(name, EntryStatus::Failed, message.clone());
                CycleOutcome::Failed { message }
            }
        };
        Ok(outcome)
    }

    fn complete(
        &self,
        entry: &QueueEntry,
        commit: &str,
        tier: MergeTier,
        resumed: &mut Vec<String>,
    ) -> CycleOutcome {
        let name = entry.operation.as_str();
        let landed = format!("merged at {} via {}", commit, tier);
        let done = CycleOutcome::Completed {
            commit: commit.to_string(),
            tier,
        };

        if entry.merge_type == MergeType::Branch {
            self.finish(name, EntryStatus::Completed, landed);
            return done;
        }

        match self.lifecycle.record_merge(name, commit) {
            Ok(record) => {
                self.finish(name, EntryStatus::Completed, landed);
                for dependent in record.released {
                    match self.lifecycle.get(&dependent) {
                        Ok(Some(op)) => match self.sessions.resume(&op) {
                            Ok(()) => {
                                log::info!("[MergeQueue] Resumed {} after {} merged", dependent, name);
                                resumed.push(dependent);
                            }
                            Err(e) => log::warn!("[MergeQueue] Failed to resume {}: {}", dependent, e),
                        },
                        Ok(None) => {}
                        Err(e) => log::warn!("[MergeQueue] Failed to load {}: {}", dependent, e),
                    }
                }
                done
            }
            Err(e) => {
                let merged = matches!(
                    self.lifecycle.get(name),
                    Ok(Some(ref op)) if op.phase == Phase::Merged
                );
                if merged {
                    log::warn!(
                        "[MergeQueue] {} merged but follow-up failed: {}; run `integrator op release {}`",
                        name,
                        e,
                        name
                    );
                    self.finish(name, EntryStatus::Completed, format!("{}; {}", landed, e));
                    done
                } else {
                    log::error!(
                        "[MergeQueue] {} landed at {} but could not be recorded: {}",
                        name,
                        commit,
                        e
                    );
                    let message = format!("{}; recording failed: {}", landed, e);
                    self.finish(name, EntryStatus::Failed, message.clone());
                    CycleOutcome::Failed { message }
                }
            }
        }
    }

    /// Bounded retry of transient failures
    fn requeue(&self, entry: &QueueEntry, error: &Error) -> CycleOutcome {
        let name = entry.operation.as_str();
        let attempts = entry.attempts + 1;
        let message = error.to_string();

        if attempts >= self.config.max_attempts {
            log::error!(
                "[MergeQueue] {} failed after {} attempts: {}",
                name,
                attempts,
                message
            );
            self.update_entry(name, |e| {
                e.attempts = attempts;
                e.status = EntryStatus::Failed;
                e.last_message = Some(message.clone());
            });
            return CycleOutcome::Failed { message };
        }

        log::warn!(
            "[MergeQueue] {} attempt {}/{} failed: {}",
            name,
            attempts,
            self.config.max_attempts,
            message
        );
        self.update_entry(name, |e| {
            e.attempts = attempts;
            e.status = EntryStatus::Pending;
            e.last_message = Some(message.clone());
        });
        CycleOutcome::Requeued { attempts, message }
    }

    fn finish(&self, name: &str, status: EntryStatus, message: String) {
        self.update_entry(name, |e| {
            e.status = status;
            e.last_message = Some(message);
        });
    }

    fn note(&self, name: &str, message: String) {
        self.update_entry(name, |e| e.last_message = Some(message));
    }

    /// Entry bookkeeping never aborts a cycle; the entry may have been
    /// removed by hand meanwhile
    fn update_entry<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut QueueEntry),
    {
        if let Err(e) = self.store.update(name, f) {
            log::warn!("[MergeQueue] Failed to update entry {}: {}", name, e);
        }
    }
}
