//! Merge queue
//!
//! Entries wait here until the scheduler finds them ready and hands them to
//! the merge engine. Every mutation takes the queue lock, reads the whole
//! document, applies the change and writes it back atomically.

pub mod daemon;
pub mod readiness;
pub mod scheduler;

pub use readiness::{Readiness, ReadinessContext};
pub use scheduler::{CycleOutcome, CycleReport, SchedulerContext};

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::file_storage::queue::{read_queue, write_queue, QueueFile};
use crate::lifecycle::OperationLifecycle;
use crate::lock::FileLock;
use crate::models::state_machine::StateTransitionError;
use crate::models::{EntryStatus, MergeType, QueueEntry};
use crate::utils::{queue_lock_path, validate_name};

/// Locked access to the queue document of one project
pub struct QueueStore {
    project_path: PathBuf,
    lock_wait: Duration,
}

impl QueueStore {
    pub fn new(project_path: &Path, lock_wait: Duration) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            lock_wait,
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// Queue lock, read, mutate, write. Nothing is written when `f` fails or
    /// leaves the document unchanged.
    pub(crate) fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut QueueFile) -> Result<T>,
    {
        let _guard = FileLock::new(queue_lock_path(&self.project_path), "merge queue update")
            .acquire_within(self.lock_wait)?;

        let original = read_queue(&self.project_path).map_err(Error::Storage)?;
        let mut queue = original.clone();
        let value = f(&mut queue)?;
        if queue != original {
            write_queue(&self.project_path, &queue).map_err(Error::Storage)?;
        }
        Ok(value)
    }

    /// Queue a tracked operation
    pub fn enqueue_operation(
        &self,
        name: &str,
        worktree: Option<PathBuf>,
        priority: i32,
        issue_id: Option<String>,
    ) -> Result<QueueEntry> {
        validate_name(name)?;
        let mut entry = QueueEntry::new(name, worktree, priority, MergeType::Operation);
        entry.issue_id = issue_id;
        self.insert(entry)
    }

    /// Queue a bare branch with no operation document
    pub fn enqueue_branch(
        &self,
        branch: &str,
        worktree: Option<PathBuf>,
        priority: i32,
    ) -> Result<QueueEntry> {
        if branch.trim().is_empty() || branch.chars().any(char::is_whitespace) {
            return Err(Error::InvalidName(branch.to_string()));
        }
        self.insert(QueueEntry::new(branch, worktree, priority, MergeType::Branch))
    }

    fn insert(&self, entry: QueueEntry) -> Result<QueueEntry> {
        self.mutate(|queue| {
            if let Some(existing) = queue.find(&entry.operation) {
                if existing.status.is_active() {
                    return Err(Error::DuplicateEntry(entry.operation.clone()));
                }
                log::info!(
                    "[MergeQueue] Replacing {} entry for {}",
                    existing.status,
                    entry.operation
                );
                queue.entries.retain(|e| e.operation != entry.operation);
            }
            log::info!(
                "[MergeQueue] Enqueued {} (priority {})",
                entry.operation,
                entry.priority
            );
            queue.entries.push(entry.clone());
            Ok(entry)
        })
    }

    /// All entries in scheduling order
    pub fn list(&self) -> Result<Vec<QueueEntry>> {
        let mut entries = read_queue(&self.project_path)
            .map_err(Error::Storage)?
            .entries;
        entries.sort_by_key(|e| e.sort_key());
        Ok(entries)
    }

    pub fn get(&self, name: &str) -> Result<Option<QueueEntry>> {
        Ok(read_queue(&self.project_path)
            .map_err(Error::Storage)?
            .find(name)
            .cloned())
    }

    /// Put an entry back to `pending` with a clean slate
    pub fn retry(&self, name: &str) -> Result<QueueEntry> {
        self.mutate(|queue| {
            let entry = queue
                .find_mut(name)
                .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
            let previous = entry.status;
            entry.reset_to_pending();
            log::info!("[MergeQueue] Requeued {} (was {})", name, previous);
            Ok(entry.clone())
        })
    }

    /// Drop an entry; returns whether one existed
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.mutate(|queue| {
            let before = queue.entries.len();
            queue.entries.retain(|e| e.operation != name);
            Ok(queue.entries.len() != before)
        })
    }

    /// Apply `f` to one entry and stamp `updated_at`
    pub fn update<F>(&self, name: &str, f: F) -> Result<QueueEntry>
    where
        F: FnOnce(&mut QueueEntry),
    {
        self.mutate(|queue| {
            let entry = queue
                .find_mut(name)
                .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
            let before = entry.clone();
            f(entry);
            if *entry != before {
                entry.updated_at = Utc::now();
            }
            Ok(entry.clone())
        })
    }

    /// Number of entries per status, for `queue status`
    pub fn counts(&self) -> Result<Vec<(EntryStatus, usize)>> {
        let entries = self.list()?;
        Ok([
            EntryStatus::Pending,
            EntryStatus::Processing,
            EntryStatus::Completed,
            EntryStatus::Failed,
            EntryStatus::Conflict,
        ]
        .into_iter()
        .map(|status| (status, entries.iter().filter(|e| e.status == status).count()))
        .collect())
    }
}

/// Flag an operation for merging and queue it.
///
/// The operation must exist and be live; the entry uses its worktree.
pub fn request_operation_merge(
    lifecycle: &OperationLifecycle,
    store: &QueueStore,
    name: &str,
    priority: i32,
    issue_id: Option<String>,
) -> Result<QueueEntry> {
    let operation = lifecycle
        .get(name)?
        .ok_or_else(|| Error::OperationNotFound(name.to_string()))?;
    if operation.phase.is_terminal() {
        return Err(StateTransitionError::AlreadyTerminal(operation.phase).into());
    }

    if let Some(existing) = store.get(name)? {
        if existing.status.is_active() {
            return Err(Error::DuplicateEntry(name.to_string()));
        }
    }

    let operation = lifecycle.request_merge(name, true)?;
    store.enqueue_operation(name, Some(operation.worktree.clone()), priority, issue_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntegratorConfig;
    use crate::lifecycle::OperationSpec;
    use crate::models::Phase;
    use crate::tracker::NullTracker;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> QueueStore {
        QueueStore::new(temp_dir.path(), Duration::from_secs(2))
    }

    #[test]
    fn test_enqueue_and_list_in_priority_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.enqueue_operation("late", None, 5, None).unwrap();
        store.enqueue_operation("urgent", None, 1, None).unwrap();
        store.enqueue_branch("fix/typo", None, 5).unwrap();

        let names: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(names, vec!["urgent", "late", "fix/typo"]);
    }

    #[test]
    fn test_active_duplicate_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.enqueue_operation("auth", None, 0, None).unwrap();
        assert!(matches!(
            store.enqueue_operation("auth", None, 0, None),
            Err(Error::DuplicateEntry(_))
        ));
    }

    #[test]
    fn test_terminal_entry_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.enqueue_operation("auth", None, 3, None).unwrap();
        store
            .update("auth", |e| e.status = EntryStatus::Failed)
            .unwrap();

        let entry = store.enqueue_operation("auth", None, 1, None).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].priority, 1);
    }

    #[test]
    fn test_branch_names_are_checked() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        assert!(matches!(
            store.enqueue_branch("", None, 0),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            store.enqueue_branch("has space", None, 0),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            store.enqueue_operation("../escape", None, 0, None),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_retry_resets_flags() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.enqueue_operation("auth", None, 0, None).unwrap();
        store
            .update("auth", |e| {
                e.status = EntryStatus::Conflict;
                e.conflict_retried = true;
                e.merge_resumed = true;
                e.worktree_missing = true;
                e.attempts = 2;
            })
            .unwrap();

        let entry = store.retry("auth").unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert!(!entry.conflict_retried);
        assert!(!entry.merge_resumed);
        assert!(!entry.worktree_missing);
        assert_eq!(entry.attempts, 0);

        assert!(matches!(store.retry("ghost"), Err(Error::EntryNotFound(_))));
    }

    #[test]
    fn test_remove_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.enqueue_operation("auth", None, 0, None).unwrap();

        assert!(store.remove("auth").unwrap());
        assert!(!store.remove("auth").unwrap());
        assert!(store.get("auth").unwrap().is_none());
    }

    #[test]
    fn test_update_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        assert!(matches!(
            store.update("ghost", |e| e.attempts += 1),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_enqueues_are_all_kept() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    QueueStore::new(&path, Duration::from_secs(10))
                        .enqueue_operation(&format!("op-{}", i), None, 0, None)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store(&temp_dir).list().unwrap().len(), 8);
    }

    #[test]
    fn test_counts_by_status() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.enqueue_operation("a", None, 0, None).unwrap();
        store.enqueue_operation("b", None, 0, None).unwrap();
        store
            .update("b", |e| e.status = EntryStatus::Completed)
            .unwrap();

        let counts = store.counts().unwrap();
        assert!(counts.contains(&(EntryStatus::Pending, 1)));
        assert!(counts.contains(&(EntryStatus::Completed, 1)));
        assert!(counts.contains(&(EntryStatus::Failed, 0)));
    }

    #[test]
    fn test_request_operation_merge_flags_and_enqueues() {
        let temp_dir = TempDir::new().unwrap();
        let config = IntegratorConfig {
            hold_after_plan: false,
            ..Default::default()
        };
        let lifecycle = OperationLifecycle::new(temp_dir.path(), Arc::new(NullTracker), &config);
        let store = store(&temp_dir);
        let worktree = temp_dir.path().join("wt-auth");
        lifecycle
            .create(OperationSpec {
                name: "auth".to_string(),
                branch: "op/auth".to_string(),
                worktree: worktree.clone(),
                ..Default::default()
            })
            .unwrap();

        let entry = request_operation_merge(&lifecycle, &store, "auth", 2, Some("bd-9".into())).unwrap();
        assert_eq!(entry.worktree, Some(worktree));
        assert_eq!(entry.issue_id.as_deref(), Some("bd-9"));
        assert!(lifecycle.get("auth").unwrap().unwrap().merge_requested);

        assert!(matches!(
            request_operation_merge(&lifecycle, &store, "ghost", 0, None),
            Err(Error::OperationNotFound(_))
        ));

        lifecycle.transition("auth", Phase::Cancelled).unwrap();
        store.remove("auth").unwrap();
        assert!(matches!(
            request_operation_merge(&lifecycle, &store, "auth", 0, None),
            Err(Error::InvalidTransition(_))
        ));
    }
}
