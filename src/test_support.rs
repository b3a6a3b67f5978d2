//! Shared fixtures for unit tests: throwaway git projects with an optional
//! bare `origin`.

use git2::{Repository, RepositoryInitOptions, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::config::{IntegratorConfig, TrackerConfig, TrackerKind};

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

pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> String {
    fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

pub struct TestProject {
    pub temp: TempDir,
    pub root: PathBuf,
    pub remote: Option<PathBuf>,
}

impl TestProject {
    /// Repository on `main` with one commit of `test.txt`
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

        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            fs::write(root.join("test.txt"), "Hello, World!\n").unwrap();
            index.add_path(Path::new("test.txt")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        Self {
            temp,
            root,
            remote: None,
        }
    }

    /// Same, plus a bare `origin` that has `main`
    pub fn with_origin() -> Self {
        let mut project = Self::new();
        let remote = project.temp.path().join("remote.git");
        Repository::init_bare(&remote).unwrap();
        git(
            &project.root,
            &["remote", "add", "origin", remote.to_str().unwrap()],
        );
        git(&project.root, &["push", "-q", "origin", "main"]);
        project.remote = Some(remote);
        project
    }

    /// Create `branch` at main and check it out in its own worktree
    pub fn worktree(&self, branch: &str) -> PathBuf {
        git(&self.root, &["branch", branch]);
        let path = self
            .temp
            .path()
            .join(format!("wt-{}", crate::utils::sanitize_branch_name(branch)));
        git(
            &self.root,
            &["worktree", "add", "-q", path.to_str().unwrap(), branch],
        );
        path
    }

    pub fn head(&self) -> String {
        git(&self.root, &["rev-parse", "HEAD"])
    }

    /// Tip of main on the bare remote
    pub fn remote_main(&self) -> String {
        let remote = self.remote.as_ref().unwrap();
        git(remote, &["rev-parse", "refs/heads/main"])
    }

    pub fn config(&self) -> IntegratorConfig {
        IntegratorConfig {
            remote: self.remote.as_ref().map(|_| "origin".to_string()),
            lock_wait_ms: 2_000,
            tracker: TrackerConfig {
                kind: TrackerKind::None,
                command: "bd".to_string(),
            },
            ..Default::default()
        }
    }
}
