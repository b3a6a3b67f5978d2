// In-process tracker for tests and dry runs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::IssueTracker;
use crate::error::{Error, Result};
use crate::utils::lock_mutex_recover;

#[derive(Debug, Clone)]
struct Issue {
    labels: BTreeSet<String>,
    closed: bool,
}

/// Issue tracker held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryTracker {
    issues: Mutex<BTreeMap<String, Issue>>,
    failing_closes: Mutex<BTreeSet<String>>,
    close_log: Mutex<Vec<String>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open issue with the given labels
    pub fn add_issue(&self, id: &str, labels: &[&str]) {
        lock_mutex_recover(&self.issues).insert(
            id.to_string(),
            Issue {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                closed: false,
            },
        );
    }

    /// Close an issue out of band, as a human would
    pub fn close(&self, id: &str) {
        if let Some(issue) = lock_mutex_recover(&self.issues).get_mut(id) {
            issue.closed = true;
        }
    }

    /// Make `close_issue` fail for this id
    pub fn fail_closing(&self, id: &str) {
        lock_mutex_recover(&self.failing_closes).insert(id.to_string());
    }

    /// Ids closed through `close_issue`, in call order
    pub fn closed_by_integrator(&self) -> Vec<String> {
        lock_mutex_recover(&self.close_log).clone()
    }
}

impl IssueTracker for MemoryTracker {
    fn open_issues(&self, labels: &[String]) -> Result<Vec<String>> {
        let issues = lock_mutex_recover(&self.issues);
        Ok(issues
            .iter()
            .filter(|(_, issue)| !issue.closed && labels.iter().any(|l| issue.labels.contains(l)))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn is_closed(&self, issue_id: &str) -> Result<bool> {
        Ok(lock_mutex_recover(&self.issues)
            .get(issue_id)
            .map(|i| i.closed)
            .unwrap_or(false))
    }

    fn close_issue(&self, issue_id: &str, _reason: &str) -> Result<()> {
        if lock_mutex_recover(&self.failing_closes).contains(issue_id) {
            return Err(Error::Tracker(format!("cannot close {}", issue_id)));
        }
        let mut issues = lock_mutex_recover(&self.issues);
        let issue = issues.entry(issue_id.to_string()).or_insert_with(|| Issue {
            labels: BTreeSet::new(),
            closed: false,
        });
        issue.closed = true;
        lock_mutex_recover(&self.close_log).push(issue_id.to_string());
        Ok(())
    }
}
