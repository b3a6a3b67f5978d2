// Merge queue commands

use std::path::PathBuf;
use std::sync::Arc;

use super::CommandContext;
use crate::error::Result;
use crate::merge_queue::daemon::{self, DaemonStatus, STOP_TIMEOUT};
use crate::merge_queue::{request_operation_merge, CycleOutcome, CycleReport};
use crate::models::QueueEntry;
use crate::shutdown::ShutdownState;

/// Run the daemon in the foreground until shutdown
pub async fn start(ctx: &CommandContext, shutdown: ShutdownState, once: bool) -> Result<String> {
    let scheduler = Arc::new(ctx.scheduler());
    let summary = daemon::run_daemon(scheduler, shutdown, once).await?;
    Ok(match (once, summary.last_report) {
        (true, Some(report)) => render_report(&report),
        _ => format!("Daemon stopped after {} cycles", summary.cycles),
    })
}

pub fn stop(ctx: &CommandContext) -> Result<String> {
    Ok(match daemon::stop(&ctx.project_path, STOP_TIMEOUT)? {
        DaemonStatus::Running(pid) => format!("Stopped daemon (pid {})", pid),
        DaemonStatus::Stale(_) => "Daemon was not running; removed stale pid file".to_string(),
        DaemonStatus::Stopped => "Daemon is not running".to_string(),
    })
}

pub fn status(ctx: &CommandContext) -> Result<String> {
    let mut out = match daemon::status(&ctx.project_path) {
        DaemonStatus::Running(pid) => format!("Daemon: running (pid {})\n", pid),
        DaemonStatus::Stale(pid) => format!(
            "Daemon: stale pid file{}; run `integrator queue stop` to clear it\n",
            pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
        ),
        DaemonStatus::Stopped => "Daemon: stopped\n".to_string(),
    };
    out.push_str(&format!(
        "Target: {}{}\n",
        ctx.config.target_branch,
        ctx.config
            .remote
            .as_ref()
            .map(|r| format!(" on {}", r))
            .unwrap_or_default()
    ));
    for (status, count) in ctx.store().counts()? {
        out.push_str(&format!("{:<11} {}\n", status.as_str(), count));
    }
    Ok(out)
}

pub fn enqueue(
    ctx: &CommandContext,
    name: &str,
    priority: i32,
    issue_id: Option<String>,
) -> Result<String> {
    let entry = request_operation_merge(&ctx.lifecycle(), &ctx.store(), name, priority, issue_id)?;
    Ok(format!(
        "Enqueued {} (priority {})",
        entry.operation, entry.priority
    ))
}

pub fn enqueue_branch(
    ctx: &CommandContext,
    branch: &str,
    worktree: Option<PathBuf>,
    priority: i32,
) -> Result<String> {
    let entry = ctx.store().enqueue_branch(branch, worktree, priority)?;
    Ok(format!(
        "Enqueued branch {} (priority {})",
        entry.operation, entry.priority
    ))
}

pub fn list(ctx: &CommandContext) -> Result<String> {
    let entries = ctx.store().list()?;
    if entries.is_empty() {
        return Ok("Queue is empty".to_string());
    }
    Ok(entries.iter().map(render_entry).collect::<Vec<_>>().join("\n"))
}

pub fn show(ctx: &CommandContext, name: &str) -> Result<String> {
    let entry = ctx
        .store()
        .get(name)?
        .ok_or_else(|| crate::error::Error::EntryNotFound(name.to_string()))?;
    Ok(serde_json::to_string_pretty(&entry)?)
}

pub fn retry(ctx: &CommandContext, name: &str) -> Result<String> {
    let entry = ctx.store().retry(name)?;
    Ok(format!("{} is pending again", entry.operation))
}

pub fn remove(ctx: &CommandContext, name: &str) -> Result<String> {
    Ok(if ctx.store().remove(name)? {
        format!("Removed {} from the queue", name)
    } else {
        format!("{} was not queued", name)
    })
}

/// Merge one entry in the foreground
pub fn merge(ctx: &CommandContext, name: &str) -> Result<String> {
    let (outcome, resumed) = ctx.scheduler().merge_now(name)?;
    let mut out = format!("{}: {}", name, render_outcome(&outcome));
    if !resumed.is_empty() {
        out.push_str(&format!("\nResumed {}", resumed.join(", ")));
    }
    Ok(out)
}

fn render_entry(entry: &QueueEntry) -> String {
    let mut line = format!(
        "{:<24} {:<10} p{:<3} {}",
        entry.operation,
        entry.status.as_str(),
        entry.priority,
        entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(ref message) = entry.last_message {
        line.push_str(&format!("  {}", message));
    }
    line
}

fn render_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Completed { commit, tier } => format!("merged at {} via {}", commit, tier),
        CycleOutcome::Conflict { files } => format!("conflict in {}", files.join(", ")),
        CycleOutcome::Failed { message } => format!("failed: {}", message),
        CycleOutcome::Requeued { attempts, message } => {
            format!("requeued after attempt {}: {}", attempts, message)
        }
    }
}

fn render_report(report: &CycleReport) -> String {
    let mut lines = Vec::new();
    if !report.purged.is_empty() {
        lines.push(format!("Purged: {}", report.purged.join(", ")));
    }
    if !report.retried.is_empty() {
        lines.push(format!("Retrying after conflict: {}", report.retried.join(", ")));
    }
    if let Some(ref name) = report.stalled {
        lines.push(format!(
            "{} is stuck in processing; run `integrator queue retry {}`",
            name, name
        ));
    }
    for (name, reason) in &report.waiting {
        lines.push(format!("Waiting: {} ({})", name, reason));
    }
    match (&report.selected, &report.outcome) {
        (Some(name), Some(outcome)) => lines.push(format!("{}: {}", name, render_outcome(outcome))),
        _ => lines.push("Nothing ready to merge".to_string()),
    }
    if !report.resumed.is_empty() {
        lines.push(format!("Resumed: {}", report.resumed.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::OperationSpec;
    use crate::models::Phase;
    use crate::test_support::{commit_file, TestProject};

    fn context(project: &TestProject) -> CommandContext {
        let mut config = project.config();
        config.hold_after_plan = false;
        CommandContext::new(&project.root, config)
    }

    #[test]
    fn test_enqueue_list_and_merge() {
        let project = TestProject::new();
        let ctx = context(&project);
        let worktree = project.worktree("op/auth");
        commit_file(&worktree, "auth.txt", "auth\n", "Auth");

        let lifecycle = ctx.lifecycle();
        lifecycle
            .create(OperationSpec {
                name: "auth".to_string(),
                branch: "op/auth".to_string(),
                worktree,
                ..Default::default()
            })
            .unwrap();
        for phase in [Phase::Planned, Phase::Queued, Phase::Executing] {
            lifecycle.transition("auth", phase).unwrap();
        }

        assert_eq!(enqueue(&ctx, "auth", 0, None).unwrap(), "Enqueued auth (priority 0)");
        assert!(list(&ctx).unwrap().contains("pending"));

        let out = merge(&ctx, "auth").unwrap();
        assert!(out.starts_with("auth: merged at"), "{}", out);
        assert!(status(&ctx).unwrap().contains("completed   1"));
    }

    #[tokio::test]
    async fn test_start_once_reports_cycle() {
        let project = TestProject::new();
        let ctx = context(&project);

        let out = start(&ctx, ShutdownState::new(), true).await.unwrap();
        assert_eq!(out, "Nothing ready to merge");
    }

    #[test]
    fn test_show_and_remove() {
        let project = TestProject::new();
        let ctx = context(&project);
        enqueue_branch(&ctx, "fix/typo", None, 2).unwrap();

        let shown = show(&ctx, "fix/typo").unwrap();
        assert!(shown.contains("\"merge_type\": \"branch\""));
        assert_eq!(remove(&ctx, "fix/typo").unwrap(), "Removed fix/typo from the queue");
        assert!(show(&ctx, "fix/typo").is_err());
        assert_eq!(list(&ctx).unwrap(), "Queue is empty");
    }

    #[test]
    fn test_status_when_stopped() {
        let project = TestProject::new();
        let out = status(&context(&project)).unwrap();
        assert!(out.starts_with("Daemon: stopped"));
        assert!(out.contains("Target: main"));
        assert_eq!(stop(&context(&project)).unwrap(), "Daemon is not running");
    }
}
