//! Process-backed agent sessions
//!
//! Whoever launches an agent records its pid in
//! `.integrator/sessions/<operation>.pid`; liveness is a `sysinfo` lookup of
//! that pid. Resuming runs the configured `agent.resume_command` in the
//! operation's worktree.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::AgentSessions;
use crate::error::{Error, Result};
use crate::file_storage::atomic_write;
use crate::lock::is_process_alive;
use crate::models::Operation;
use crate::utils::sessions_dir;

pub struct ProcessSessions {
    project_path: PathBuf,
    resume_command: Option<String>,
}

impl ProcessSessions {
    pub fn new(project_path: &Path, resume_command: Option<String>) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            resume_command,
        }
    }

    fn pid_path(&self, name: &str) -> PathBuf {
        sessions_dir(&self.project_path).join(format!("{}.pid", name))
    }

    /// Record the pid of an agent working on an operation
    pub fn register(&self, name: &str, pid: u32) -> Result<()> {
        atomic_write(&self.pid_path(name), &pid.to_string()).map_err(Error::Session)
    }

    /// Forget an operation's agent
    pub fn clear(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.pid_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn recorded_pid(&self, name: &str) -> Option<u32> {
        fs::read_to_string(self.pid_path(name))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(unix)]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
    }
}

impl AgentSessions for ProcessSessions {
    fn is_running(&self, operation: &Operation) -> Result<bool> {
        let Some(pid) = self.recorded_pid(&operation.name) else {
            return Ok(false);
        };
        let alive = is_process_alive(pid);
        if !alive {
            log::debug!(
                "[Agents] Agent for {} (PID {}) is not running",
                operation.name,
                pid
            );
        }
        Ok(alive)
    }

    fn resume(&self, operation: &Operation) -> Result<()> {
        if self.is_running(operation)? {
            log::debug!("[Agents] Agent for {} already running", operation.name);
            return Ok(());
        }

        let Some(ref command) = self.resume_command else {
            return Err(Error::Session(format!(
                "no agent.resume_command configured to resume {}",
                operation.name
            )));
        };

        if !operation.worktree.exists() {
            return Err(Error::Session(format!(
                "worktree {} for {} does not exist",
                operation.worktree.display(),
                operation.name
            )));
        }

        let mut child = Self::shell_command(command)
            .current_dir(&operation.worktree)
            .env("INTEGRATOR_OPERATION", &operation.name)
            .env("INTEGRATOR_BRANCH", &operation.branch)
            .env("INTEGRATOR_WORKTREE", &operation.worktree)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::Session(format!("failed to start agent for {}: {}", operation.name, e))
            })?;

        let pid = child.id();
        self.register(&operation.name, pid)?;
        log::info!(
            "[Agents] Resumed agent for {} (PID {})",
            operation.name,
            pid
        );

        // Reap the child so it doesn't linger as a zombie
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}
