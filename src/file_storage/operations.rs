//! Operation document storage
//!
//! One directory per operation in `.integrator/operations/{name}/`:
//! - `operation.json` - the current document, replaced atomically
//! - `events.jsonl` - append-only event records
//!
//! This is the plain data layer. Locking and transition rules live in
//! `crate::lifecycle`.

use super::{ensure_dir, get_integrator_dir, read_json, write_json, FileResult};
use crate::models::{Operation, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A single line of an operation's event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub at: DateTime<Utc>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventRecord {
    pub fn new(kind: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
            kind: kind.to_string(),
            from: None,
            to: None,
            detail: None,
        }
    }

    pub fn transition(from: Phase, to: Phase) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::new("transition")
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Get the directory holding all operation directories
pub fn get_operations_dir(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("operations")
}

/// Get the directory for a single operation
pub fn get_operation_dir(project_path: &Path, name: &str) -> PathBuf {
    get_operations_dir(project_path).join(name)
}

/// Get the document path for an operation
pub fn get_operation_file_path(project_path: &Path, name: &str) -> PathBuf {
    get_operation_dir(project_path, name).join("operation.json")
}

/// Get the event log path for an operation
pub fn get_events_file_path(project_path: &Path, name: &str) -> PathBuf {
    get_operation_dir(project_path, name).join("events.jsonl")
}

/// Check whether an operation document exists
pub fn operation_exists(project_path: &Path, name: &str) -> bool {
    get_operation_file_path(project_path, name).exists()
}

/// Read an operation, `None` when it doesn't exist
pub fn read_operation(project_path: &Path, name: &str) -> FileResult<Option<Operation>> {
    let path = get_operation_file_path(project_path, name);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// Replace an operation document atomically
///
/// Documents that break the merge-commit invariant are refused.
pub fn write_operation(project_path: &Path, operation: &Operation) -> FileResult<()> {
    operation.validate()?;
    let dir = get_operation_dir(project_path, &operation.name);
    ensure_dir(&dir)?;
    write_json(&dir.join("operation.json"), operation)
}

/// List all operations, skipping directories without a readable document
pub fn list_operations(project_path: &Path) -> FileResult<Vec<Operation>> {
    let dir = get_operations_dir(project_path);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut operations = Vec::new();
    let entries =
        fs::read_dir(&dir).map_err(|e| format!("Failed to read directory {:?}: {}", dir, e))?;

    for entry in entries.flatten() {
        let path = entry.path().join("operation.json");
        if !path.exists() {
            continue;
        }
        match read_json::<Operation>(&path) {
            Ok(op) => operations.push(op),
            Err(e) => log::warn!("[OperationStore] Skipping unreadable document: {}", e),
        }
    }

    operations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(operations)
}

/// Remove an operation directory entirely
pub fn delete_operation(project_path: &Path, name: &str) -> FileResult<bool> {
    let dir = get_operation_dir(project_path, name);
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&dir).map_err(|e| format!("Failed to remove {:?}: {}", dir, e))?;
    Ok(true)
}

/// Append an event record to an operation's log
pub fn append_event(project_path: &Path, name: &str, event: &EventRecord) -> FileResult<()> {
    let path = get_events_file_path(project_path, name);
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let line =
        serde_json::to_string(event).map_err(|e| format!("Failed to serialize event: {}", e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open {:?}: {}", path, e))?;

    writeln!(file, "{}", line).map_err(|e| format!("Failed to append to {:?}: {}", path, e))
}

/// Read all event records for an operation (oldest first)
pub fn read_events(project_path: &Path, name: &str) -> FileResult<Vec<EventRecord>> {
    let path = get_events_file_path(project_path, name);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(&path).map_err(|e| format!("Failed to open {:?}: {}", path, e))?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => log::warn!("[OperationStore] Skipping malformed event line: {}", e),
        }
    }
    Ok(events)
}
