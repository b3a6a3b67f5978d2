//! Merge queue document storage
//!
//! Stored as `.integrator/merge-queue.json`. Callers must hold the queue
//! lock for the whole read-modify-write; see `crate::merge_queue::QueueStore`.

use super::{get_integrator_dir, read_json, write_json, FileResult};
use crate::models::QueueEntry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version of the queue file format
pub const QUEUE_FILE_VERSION: u32 = 1;

/// The persisted queue document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueFile {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<QueueEntry>,
}

impl Default for QueueFile {
    fn default() -> Self {
        Self {
            version: QUEUE_FILE_VERSION,
            entries: Vec::new(),
        }
    }
}

impl QueueFile {
    pub fn find(&self, name: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.operation == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.operation == name)
    }
}

/// Get the queue document path
pub fn get_queue_file_path(project_path: &Path) -> PathBuf {
    get_integrator_dir(project_path).join("merge-queue.json")
}

/// Read the queue, returning an empty queue if the file doesn't exist
pub fn read_queue(project_path: &Path) -> FileResult<QueueFile> {
    let path = get_queue_file_path(project_path);
    if !path.exists() {
        return Ok(QueueFile::default());
    }

    let queue: QueueFile = read_json(&path)?;
    if queue.version > QUEUE_FILE_VERSION {
        return Err(format!(
            "Queue file {:?} has version {}, newer than supported version {}",
            path, queue.version, QUEUE_FILE_VERSION
        ));
    }
    Ok(queue)
}

/// Replace the queue document atomically
pub fn write_queue(project_path: &Path, queue: &QueueFile) -> FileResult<()> {
    write_json(&get_queue_file_path(project_path), queue)
}
