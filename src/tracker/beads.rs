// Beads (`bd`) command line tracker

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::IssueTracker;
use crate::error::{Error, Result};

/// The subset of a `bd ... --json` issue we read
#[derive(Debug, Deserialize)]
struct BeadsIssue {
    id: String,
    #[serde(default)]
    status: String,
}

/// Tracker backed by the `bd` CLI, run from the project root
pub struct BeadsTracker {
    command: PathBuf,
    project_path: PathBuf,
}

impl BeadsTracker {
    pub fn new(command: impl Into<PathBuf>, project_path: &Path) -> Self {
        Self {
            command: command.into(),
            project_path: project_path.to_path_buf(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.command)
            .args(args)
            .current_dir(&self.project_path)
            .output()
            .map_err(|e| Error::Tracker(format!("failed to run bd {}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tracker(format!(
                "bd {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_issues(stdout: &str) -> Result<Vec<BeadsIssue>> {
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(stdout)
            .map_err(|e| Error::Tracker(format!("failed to parse bd JSON: {}", e)))
    }
}

impl IssueTracker for BeadsTracker {
    fn open_issues(&self, labels: &[String]) -> Result<Vec<String>> {
        let mut open = BTreeSet::new();
        for label in labels {
            let stdout = self.run(&["list", "--status", "open", "--label", label, "--json"])?;
            for issue in Self::parse_issues(&stdout)? {
                if issue.status != "closed" {
                    open.insert(issue.id);
                }
            }
        }
        Ok(open.into_iter().collect())
    }

    fn is_closed(&self, issue_id: &str) -> Result<bool> {
        // `bd show --json` returns an array even for a single id
        let stdout = match self.run(&["show", issue_id, "--json"]) {
            Ok(stdout) => stdout,
            Err(e) => {
                log::debug!("[Tracker] Treating {} as not closed: {}", issue_id, e);
                return Ok(false);
            }
        };
        Ok(Self::parse_issues(&stdout)?
            .into_iter()
            .find(|i| i.id == issue_id)
            .map(|i| i.status == "closed")
            .unwrap_or(false))
    }

    fn close_issue(&self, issue_id: &str, reason: &str) -> Result<()> {
        if self.is_closed(issue_id)? {
            log::debug!("[Tracker] {} already closed", issue_id);
            return Ok(());
        }
        self.run(&["close", issue_id, &format!("--reason={}", reason)])?;
        log::info!("[Tracker] Closed {} ({})", issue_id, reason);
        Ok(())
    }
}
