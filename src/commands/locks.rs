// Lock diagnosis

use super::CommandContext;
use crate::error::Result;
use crate::file_storage::get_integrator_dir;
use crate::lock::{scan_locks, FileLock, LockStatus};

/// Report every lock file; with `clean`, take over and remove stale ones
pub fn locks(ctx: &CommandContext, clean: bool) -> Result<String> {
    let found = scan_locks(&get_integrator_dir(&ctx.project_path));
    if found.is_empty() {
        return Ok("No locks held".to_string());
    }

    let mut lines = Vec::new();
    for status in &found {
        let path = status
            .path
            .strip_prefix(&ctx.project_path)
            .unwrap_or(&status.path)
            .display();
        if !status.is_stale() {
            lines.push(format!("{}  held by {}", path, status.info.render()));
            continue;
        }
        if clean {
            remove_stale(status)?;
            lines.push(format!("{}  stale ({}), removed", path, status.info.render()));
        } else {
            lines.push(format!(
                "{}  stale ({}); remove stale lock at {} or run `integrator locks --clean`",
                path,
                status.info.render(),
                status.path.display()
            ));
        }
    }
    Ok(lines.join("\n"))
}

fn remove_stale(status: &LockStatus) -> Result<()> {
    // Acquiring reclaims the file; dropping the guard unlinks it
    drop(FileLock::new(&status.path, "lock cleanup").try_acquire()?);
    log::info!("[Lock] Removed stale lock {:?}", status.path);
    Ok(())
}
