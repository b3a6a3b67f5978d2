// Shared setup for integration tests: a project repository with a bare
// origin, in-memory tracker and sessions, and a scheduler wired to them.

#![allow(dead_code)]

use git2::{Repository, RepositoryInitOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use integrator_lib::agents::MemorySessions;
use integrator_lib::config::{IntegratorConfig, TrackerConfig, TrackerKind};
use integrator_lib::lifecycle::OperationSpec;
use integrator_lib::merge_queue::{request_operation_merge, SchedulerContext};
use integrator_lib::models::{Phase, QueueEntry};
use integrator_lib::tracker::MemoryTracker;

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Whether `git merge-base --is-ancestor` holds
pub fn is_ancestor(dir: &Path, commit: &str, tip: &str) -> bool {
    Command::new("git")
        .args(["merge-base", "--is-ancestor", commit, tip])
        .current_dir(dir)
        .status()
        .unwrap()
        .success()
}

pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> String {
    fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub struct Harness {
    pub temp: TempDir,
    pub root: PathBuf,
    pub remote: PathBuf,
    pub tracker: Arc<MemoryTracker>,
    pub sessions: Arc<MemorySessions>,
    pub scheduler: SchedulerContext,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("project");
        fs::create_dir_all(&root).unwrap();

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&root, &opts).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
            config.set_bool("commit.gpgsign", false).unwrap();
        }
        commit_file(&root, "README.md", "# project\n", "Initial commit");

        let remote = temp.path().join("remote.git");
        Repository::init_bare(&remote).unwrap();
        git(&root, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&root, &["push", "-q", "origin", "main"]);

        let tracker = Arc::new(MemoryTracker::new());
        let sessions = Arc::new(MemorySessions::new());
        let config = IntegratorConfig {
            remote: Some("origin".to_string()),
            lock_wait_ms: 2_000,
            hold_after_plan: false,
            tracker: TrackerConfig {
                kind: TrackerKind::None,
                command: "bd".to_string(),
            },
            ..Default::default()
        };
        let scheduler =
            SchedulerContext::new(&root, config, tracker.clone(), sessions.clone());

        Self {
            temp,
            root,
            remote,
            tracker,
            sessions,
            scheduler,
        }
    }

    pub fn worktree_path(&self, name: &str) -> PathBuf {
        self.temp.path().join(format!("wt-{}", name))
    }

    /// Branch `op/<name>` in its own worktree with one commit of `<file>`
    pub fn start_work(&self, name: &str, file: &str, content: &str) -> PathBuf {
        let branch = format!("op/{}", name);
        let path = self.worktree_path(name);
        git(
            &self.root,
            &["worktree", "add", "-q", "-b", &branch, path.to_str().unwrap(), "main"],
        );
        commit_file(&path, file, content, &format!("Work on {}", name));
        path
    }

    /// Create, drive to executing and enqueue an operation
    pub fn operation(&self, name: &str, worktree: PathBuf, epic: Option<&str>, blocked_by: &[&str]) {
        let lifecycle = self.scheduler.lifecycle();
        lifecycle
            .create(OperationSpec {
                name: name.to_string(),
                branch: format!("op/{}", name),
                worktree,
                epic_id: epic.map(str::to_string),
                blocked_by: blocked_by.iter().map(|s| s.to_string()).collect(),
                labels: Vec::new(),
            })
            .unwrap();
        for phase in [Phase::Planned, Phase::Queued, Phase::Executing] {
            lifecycle.transition(name, phase).unwrap();
        }
        request_operation_merge(lifecycle, self.scheduler.store(), name, 0, None).unwrap();
    }

    /// Commit on main and publish it, as another merge would
    pub fn advance_main(&self, file: &str, content: &str) -> String {
        let head = commit_file(&self.root, file, content, "Advance main");
        git(&self.root, &["push", "-q", "origin", "main"]);
        head
    }

    pub fn entry(&self, name: &str) -> QueueEntry {
        self.scheduler.store().get(name).unwrap().unwrap()
    }

    pub fn head(&self) -> String {
        git(&self.root, &["rev-parse", "HEAD"])
    }

    pub fn remote_main(&self) -> String {
        git(&self.remote, &["rev-parse", "refs/heads/main"])
    }
}
