//! Merge queue daemon
//!
//! Runs scheduler cycles on a blocking thread at a fixed interval until a
//! shutdown is requested. The pid file is an advisory lock like the others,
//! so a crashed daemon never blocks the next one.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::scheduler::{CycleReport, SchedulerContext, DAEMON_HOLDER};
use crate::error::{Error, Result};
use crate::lock::{is_process_alive, FileLock, LockGuard};
use crate::shutdown::ShutdownState;
use crate::utils::daemon_pid_path;

/// How long `stop` waits for the daemon to exit
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(u32),
    /// Pid file left by a daemon that is gone
    Stale(Option<u32>),
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct DaemonSummary {
    pub cycles: u64,
    pub last_report: Option<CycleReport>,
}

/// Claim the pid file, refusing when a live daemon owns it
pub fn claim_pid_file(project_path: &Path) -> Result<LockGuard> {
    match FileLock::new(daemon_pid_path(project_path), DAEMON_HOLDER).try_acquire() {
        Err(Error::LockHeld { holder, .. }) => Err(Error::Daemon(format!(
            "already running: {}; stop it with `integrator queue stop`",
            holder
        ))),
        other => other,
    }
}

pub fn status(project_path: &Path) -> DaemonStatus {
    let lock = FileLock::new(daemon_pid_path(project_path), DAEMON_HOLDER);
    let Some(info) = lock.holder() else {
        return DaemonStatus::Stopped;
    };
    match info.pid {
        Some(pid) if lock.is_held() && is_process_alive(pid) => DaemonStatus::Running(pid),
        pid => DaemonStatus::Stale(pid),
    }
}

/// Signal the daemon and wait for it to exit. Returns the status found
/// before stopping.
pub fn stop(project_path: &Path, timeout: Duration) -> Result<DaemonStatus> {
    let found = status(project_path);
    let pid = match found {
        DaemonStatus::Stopped => return Ok(found),
        DaemonStatus::Stale(_) => {
            remove_stale_pid_file(project_path)?;
            return Ok(found);
        }
        DaemonStatus::Running(pid) => pid,
    };

    if pid == std::process::id() {
        return Err(Error::Daemon("refusing to signal this process".to_string()));
    }

    log::info!("[MergeQueue] Stopping daemon (pid {})", pid);
    if !terminate(pid) {
        return Err(Error::Daemon(format!("could not signal pid {}", pid)));
    }

    let deadline = Instant::now() + timeout;
    while is_process_alive(pid) {
        if Instant::now() >= deadline {
            return Err(Error::Daemon(format!(
                "pid {} did not exit within {}s",
                pid,
                timeout.as_secs()
            )));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    remove_stale_pid_file(project_path)?;
    Ok(found)
}

fn terminate(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill()),
        None => false,
    }
}

/// Drop a pid file nobody holds
fn remove_stale_pid_file(project_path: &Path) -> Result<()> {
    let lock = FileLock::new(daemon_pid_path(project_path), DAEMON_HOLDER);
    if lock.holder().is_none() || lock.is_held() {
        return Ok(());
    }
    // Taking and dropping the lock unlinks the file
    drop(lock.try_acquire()?);
    log::info!("[MergeQueue] Removed stale daemon pid file");
    Ok(())
}

/// Run cycles until shutdown (or one cycle with `once`)
pub async fn run_daemon(
    ctx: Arc<SchedulerContext>,
    shutdown: ShutdownState,
    once: bool,
) -> Result<DaemonSummary> {
    let _pid_file = claim_pid_file(ctx.project_path())?;
    let interval = ctx.config().poll_interval();
    log::info!(
        "[MergeQueue] Daemon started for {} (pid {}, every {}s)",
        ctx.project_path().display(),
        std::process::id(),
        interval.as_secs()
    );

    let mut summary = DaemonSummary::default();
    while !shutdown.is_shutdown_requested() {
        let cycle_ctx = ctx.clone();
        match tokio::task::spawn_blocking(move || cycle_ctx.run_cycle()).await {
            Ok(Ok(report)) => {
                log_report(&report);
                summary.last_report = Some(report);
            }
            Ok(Err(e)) => {
                log::error!("[MergeQueue] Cycle failed: {}", e);
                if let Some(hint) = e.remediation() {
                    log::error!("[MergeQueue] {}", hint);
                }
            }
            Err(e) => log::error!("[MergeQueue] Cycle task failed: {}", e),
        }
        summary.cycles += 1;

        if once || shutdown.sleep(interval).await {
            break;
        }
    }

    log::info!("[MergeQueue] Daemon stopped after {} cycles", summary.cycles);
    Ok(summary)
}

fn log_report(report: &CycleReport) {
    if !report.purged.is_empty() {
        log::info!("[MergeQueue] Purged {}", report.purged.join(", "));
    }
    if let (Some(name), Some(outcome)) = (&report.selected, &report.outcome) {
        log::info!("[MergeQueue] {} -> {:?}", name, outcome);
    }
    log::debug!(
        "[MergeQueue] Cycle done: {} waiting, {} retried",
        report.waiting.len(),
        report.retried.len()
    );
}
