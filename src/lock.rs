//! Advisory file locks for the queue, the merge critical section and
//! per-operation documents
//!
//! A lock file contains `"<holder> (pid <pid>)"`; presence means held.
//! The guard also holds an `fs2` exclusive lock on the open file, so the
//! kernel drops it when the holder process exits. A leftover file whose
//! advisory lock is free belongs to a dead holder and is taken over.

use crate::error::{Error, Result};
use fs2::FileExt;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a briefly-held lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Attempts to re-open the lock file when it was replaced under us
const MAX_REOPEN_ATTEMPTS: u32 = 5;

/// Parsed lock file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Who holds the lock, e.g. "merge-queue daemon"
    pub holder: String,
    /// Process ID that holds the lock
    pub pid: Option<u32>,
}

impl LockInfo {
    /// Lock info for the current process
    pub fn current(holder: &str) -> Self {
        Self {
            holder: holder.to_string(),
            pid: Some(std::process::id()),
        }
    }

    /// Parse `"<holder> (pid <pid>)"`, keeping unparseable text as the holder
    pub fn parse(contents: &str) -> Self {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^(?s)(.*) \(pid (\d+)\)\s*$").unwrap_or_else(|e| unreachable!("{}", e))
        });

        let contents = contents.trim();
        match pattern.captures(contents) {
            Some(caps) => Self {
                holder: caps[1].to_string(),
                pid: caps[2].parse().ok(),
            },
            None => Self {
                holder: if contents.is_empty() {
                    "unknown holder".to_string()
                } else {
                    contents.to_string()
                },
                pid: None,
            },
        }
    }

    /// Render as lock file contents
    pub fn render(&self) -> String {
        match self.pid {
            Some(pid) => format!("{} (pid {})", self.holder, pid),
            None => self.holder.clone(),
        }
    }

    /// Whether the named process is still running
    pub fn is_holder_alive(&self) -> bool {
        self.pid.map(is_process_alive).unwrap_or(false)
    }
}

/// Check whether a pid names a live, non-zombie process
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// A named lock file
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    holder: String,
}

/// Held lock; released when dropped, on every exit path
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, holder: &str) -> Self {
        Self {
            path: path.into(),
            holder: holder.to_string(),
        }
    }

    /// Get the lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try once; fails fast with the current holder when contended
    pub fn try_acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_REOPEN_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;

            if let Err(e) = FileExt::try_lock_exclusive(&file) {
                if e.kind() != fs2::lock_contended_error().kind() {
                    return Err(Error::Io(e));
                }
                let info = read_info(&mut file);
                return Err(Error::LockHeld {
                    path: self.path.clone(),
                    holder: info.render(),
                    holder_dead: info.pid.is_some() && !info.is_holder_alive(),
                });
            }

            // The previous holder may have unlinked the file between our
            // open and lock; that inode is no longer the lock.
            if !same_file(&file, &self.path) {
                continue;
            }

            let previous = read_info(&mut file);
            if previous.pid.is_some() {
                log::info!(
                    "[Lock] Reclaiming {:?} left by {}",
                    self.path,
                    previous.render()
                );
            }

            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(LockInfo::current(&self.holder).render().as_bytes())?;
            file.sync_all()?;

            log::debug!("[Lock] Acquired {:?} as {}", self.path, self.holder);
            return Ok(LockGuard {
                path: self.path.clone(),
                file: Some(file),
            });
        }

        Err(Error::Storage(format!(
            "Lock file {:?} kept changing while acquiring it",
            self.path
        )))
    }

    /// Wait up to `wait` for a briefly-held lock
    pub fn acquire_within(&self, wait: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + wait;
        loop {
            match self.try_acquire() {
                Err(Error::LockHeld { .. }) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                other => return other,
            }
        }
    }

    /// Current holder, if the lock file is present
    pub fn holder(&self) -> Option<LockInfo> {
        let mut file = File::open(&self.path).ok()?;
        Some(read_info(&mut file))
    }

    /// Whether a live process holds the advisory lock right now
    pub fn is_held(&self) -> bool {
        let Ok(file) = File::open(&self.path) else {
            return false;
        };
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlink before unlocking so nobody can lock the old inode after us
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[Lock] Failed to remove {:?}: {}", self.path, e);
            }
        }
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        log::debug!("[Lock] Released {:?}", self.path);
    }
}

fn read_info(file: &mut File) -> LockInfo {
    let mut contents = String::new();
    let _ = file.seek(SeekFrom::Start(0));
    let _ = file.read_to_string(&mut contents);
    LockInfo::parse(&contents)
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// Status of one known lock, for diagnosis
#[derive(Debug, Clone)]
pub struct LockStatus {
    pub path: PathBuf,
    pub info: LockInfo,
    /// A process currently holds the advisory lock
    pub held: bool,
    /// The named pid is still running
    pub holder_alive: bool,
}

impl LockStatus {
    /// The file is present but nothing holds it
    pub fn is_stale(&self) -> bool {
        !self.held || !self.holder_alive
    }
}

/// `merge.lock` as well as the bare `.lock` kept beside operation documents
fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.ends_with(".lock"))
}

/// Inspect every lock file under a directory tree
pub fn scan_locks(root: &Path) -> Vec<LockStatus> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_lock_file(&path) {
                let lock = FileLock::new(&path, "scan");
                if let Some(info) = lock.holder() {
                    found.push(LockStatus {
                        held: lock.is_held(),
                        holder_alive: info.is_holder_alive(),
                        path,
                        info,
                    });
                }
            }
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}
