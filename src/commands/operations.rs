// Operation lifecycle commands

use std::path::PathBuf;

use super::CommandContext;
use crate::error::{Error, Result};
use crate::lifecycle::OperationSpec;
use crate::models::{Operation, Phase};

pub fn create(
    ctx: &CommandContext,
    name: &str,
    branch: &str,
    worktree: PathBuf,
    epic_id: Option<String>,
    blocked_by: Vec<String>,
    labels: Vec<String>,
) -> Result<String> {
    let op = ctx.lifecycle().create(OperationSpec {
        name: name.to_string(),
        branch: branch.to_string(),
        worktree,
        epic_id,
        blocked_by,
        labels,
    })?;
    let mut out = format!("Created {} on {}", op.name, op.branch);
    if op.held {
        out.push_str(&format!(
            " (held, blocked by {})",
            op.blocked_by.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    Ok(out)
}

pub fn transition(ctx: &CommandContext, name: &str, phase: &str) -> Result<String> {
    let to: Phase = phase
        .parse()
        .map_err(|e: String| Error::Config(format!("{}; expected one of {}", e, phase_names())))?;
    let op = ctx.lifecycle().transition(name, to)?;
    Ok(format!("{} is now {}{}", op.name, op.phase, held_suffix(&op)))
}

pub fn hold(ctx: &CommandContext, name: &str) -> Result<String> {
    let op = ctx.lifecycle().hold(name)?;
    Ok(format!("{} held in {}", op.name, op.phase))
}

pub fn resume(ctx: &CommandContext, name: &str) -> Result<String> {
    let op = ctx.lifecycle().resume(name)?;
    Ok(format!("{} resumed in {}", op.name, op.phase))
}

/// The whole document, or one field of it
pub fn show(ctx: &CommandContext, name: &str, field: Option<&str>) -> Result<String> {
    let lifecycle = ctx.lifecycle();
    match field {
        Some(field) => Ok(lifecycle.field(name, field)?.unwrap_or_default()),
        None => {
            let op = lifecycle
                .get(name)?
                .ok_or_else(|| Error::OperationNotFound(name.to_string()))?;
            Ok(serde_json::to_string_pretty(&op)?)
        }
    }
}

pub fn list(ctx: &CommandContext) -> Result<String> {
    let operations = ctx.lifecycle().list()?;
    if operations.is_empty() {
        return Ok("No operations".to_string());
    }
    Ok(operations
        .iter()
        .map(|op| {
            format!(
                "{:<24} {:<10} {}{}",
                op.name,
                op.phase.as_str(),
                op.branch,
                held_suffix(op)
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn events(ctx: &CommandContext, name: &str) -> Result<String> {
    let events = ctx.lifecycle().events(name)?;
    Ok(events
        .iter()
        .map(|e| {
            let mut line = format!("{} {}", e.at.format("%Y-%m-%d %H:%M:%S"), e.kind);
            if let (Some(from), Some(to)) = (e.from, e.to) {
                line.push_str(&format!(" {} -> {}", from, to));
            }
            if let Some(ref detail) = e.detail {
                line.push_str(&format!(" ({})", detail));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn prune(ctx: &CommandContext, name: &str, force: bool) -> Result<String> {
    Ok(if ctx.lifecycle().prune(name, force)? {
        format!("Pruned {}", name)
    } else {
        format!("{} does not exist", name)
    })
}

/// Finish releasing dependents after an interrupted merge record
pub fn release(ctx: &CommandContext, name: &str) -> Result<String> {
    let released = ctx.lifecycle().release_dependents(name)?;
    Ok(if released.is_empty() {
        format!("No dependents of {} were released", name)
    } else {
        format!("Released {}", released.join(", "))
    })
}

fn held_suffix(op: &Operation) -> &'static str {
    if op.held {
        " [held]"
    } else {
        ""
    }
}

fn phase_names() -> String {
    Phase::all()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntegratorConfig;
    use tempfile::TempDir;

    fn context(temp_dir: &TempDir) -> CommandContext {
        let mut config = IntegratorConfig::default();
        config.tracker.kind = crate::config::TrackerKind::None;
        CommandContext::new(temp_dir.path(), config)
    }

    fn create_auth(ctx: &CommandContext, blocked_by: Vec<String>) -> String {
        create(
            ctx,
            "auth",
            "op/auth",
            PathBuf::from("/tmp/wt/auth"),
            None,
            blocked_by,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_transition_and_show_field() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);

        assert_eq!(create_auth(&ctx, Vec::new()), "Created auth on op/auth");
        // hold_after_plan is on by default
        assert_eq!(
            transition(&ctx, "auth", "planned").unwrap(),
            "auth is now planned [held]"
        );
        assert_eq!(show(&ctx, "auth", Some("phase")).unwrap(), "planned");
        assert_eq!(show(&ctx, "auth", Some("held")).unwrap(), "true");
        assert_eq!(resume(&ctx, "auth").unwrap(), "auth resumed in planned");
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        create_auth(&ctx, Vec::new());

        let err = transition(&ctx, "auth", "merging").unwrap_err();
        assert!(err.to_string().contains("expected one of init"));
    }

    #[test]
    fn test_blocked_create_reports_hold() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        create(
            &ctx,
            "base",
            "op/base",
            PathBuf::from("/tmp/wt/base"),
            None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let out = create_auth(&ctx, vec!["base".to_string()]);
        assert_eq!(out, "Created auth on op/auth (held, blocked by base)");
        assert!(list(&ctx).unwrap().contains("[held]"));
    }

    #[test]
    fn test_events_and_prune() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        create_auth(&ctx, Vec::new());
        transition(&ctx, "auth", "cancelled").unwrap();

        let log = events(&ctx, "auth").unwrap();
        assert!(log.contains("created"));
        assert!(log.contains("init -> cancelled"));

        assert_eq!(prune(&ctx, "auth", false).unwrap(), "Pruned auth");
        assert_eq!(prune(&ctx, "auth", false).unwrap(), "auth does not exist");
        assert_eq!(list(&ctx).unwrap(), "No operations");
    }

    #[test]
    fn test_show_missing_operation() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        assert!(matches!(
            show(&ctx, "ghost", None),
            Err(Error::OperationNotFound(_))
        ));
        assert_eq!(show(&ctx, "ghost", Some("phase")).unwrap(), "");
    }
}
