// Merge engine: fast-forward, then rebase, then merge commit

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::cleanup::{cleanup_after_merge, remove_scratch_worktree};
use crate::config::IntegratorConfig;
use crate::error::{Error, Result};
use crate::git::{GitManager, MergeAttempt};
use crate::lock::FileLock;
use crate::models::{MergeType, Operation, QueueEntry};
use crate::utils::{merge_lock_path, sanitize_branch_name, scratch_dir};

/// Which strategy landed the branch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeTier {
    FastForward,
    Rebase,
    Merge,
}

impl fmt::Display for MergeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeTier::FastForward => "fast_forward",
            MergeTier::Rebase => "rebase",
            MergeTier::Merge => "merge",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { commit: String, tier: MergeTier },
    /// Nothing landed; the target branch is unchanged and clean
    Conflict { files: Vec<String> },
}

/// One branch to land
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Operation name, or the branch for branch merges
    pub name: String,
    pub branch: String,
    pub worktree: Option<PathBuf>,
    pub merge_type: MergeType,
}

impl MergeRequest {
    pub fn for_operation(operation: &Operation) -> Self {
        Self {
            name: operation.name.clone(),
            branch: operation.branch.clone(),
            worktree: Some(operation.worktree.clone()),
            merge_type: MergeType::Operation,
        }
    }

    pub fn for_branch(branch: &str, worktree: Option<PathBuf>) -> Self {
        Self {
            name: branch.to_string(),
            branch: branch.to_string(),
            worktree,
            merge_type: MergeType::Branch,
        }
    }

    /// Build from a queue entry, looking up the operation for operation entries
    pub fn from_entry(entry: &QueueEntry, operation: Option<&Operation>) -> Result<Self> {
        match entry.merge_type {
            MergeType::Operation => operation
                .map(Self::for_operation)
                .ok_or_else(|| Error::OperationNotFound(entry.operation.clone())),
            MergeType::Branch => Ok(Self::for_branch(&entry.operation, entry.worktree.clone())),
        }
    }
}

pub struct MergeEngine {
    project_path: PathBuf,
    target_branch: String,
    remote: Option<String>,
    holder: String,
}

impl MergeEngine {
    /// `holder` is written into the merge lock, e.g. "merge-queue daemon"
    pub fn new(project_path: &Path, config: &IntegratorConfig, holder: &str) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            target_branch: config.target_branch.clone(),
            remote: config.remote.clone(),
            holder: holder.to_string(),
        }
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    /// Run one integration attempt under the merge lock
    pub fn execute(&self, request: &MergeRequest) -> Result<MergeOutcome> {
        let _lock = FileLock::new(merge_lock_path(&self.project_path), &self.holder).try_acquire()?;
        log::info!(
            "[MergeEngine] Integrating {} ({}) into {}",
            request.name,
            request.branch,
            self.target_branch
        );

        let git = GitManager::new(&self.project_path)?;
        self.prepare_target(&git, request)?;
        let before = git.head_commit()?;

        let mut scratch = None;
        let attempt = self.land(&git, request, &mut scratch);
        if let Some(ref path) = scratch {
            remove_scratch_worktree(&git, path);
        }
        let (commit, tier) = match attempt? {
            MergeOutcome::Merged { commit, tier } => (commit, tier),
            conflict => return Ok(conflict),
        };

        if let Some(ref remote) = self.remote {
            if let Err(e) = git.push_head(remote, &self.target_branch) {
                log::warn!(
                    "[MergeEngine] Push of {} failed, restoring {} to {}",
                    request.name,
                    self.target_branch,
                    before
                );
                self.restore_target(&git, &before);
                return Err(e);
            }
        }

        if let Err(e) = self.verify(&git, &commit) {
            // Otherwise the next push would publish it
            log::warn!(
                "[MergeEngine] Verification of {} failed, restoring {} to {}",
                request.name,
                self.target_branch,
                before
            );
            self.restore_target(&git, &before);
            return Err(e);
        }
        log::info!(
            "[MergeEngine] {} landed on {} at {} via {}",
            request.name,
            self.target_branch,
            commit,
            tier
        );

        cleanup_after_merge(&git, request, self.remote.as_deref());
        Ok(MergeOutcome::Merged { commit, tier })
    }

    /// Check out and update the target; fails before anything is changed
    fn prepare_target(&self, git: &GitManager, request: &MergeRequest) -> Result<()> {
        if request.branch == self.target_branch {
            return Err(Error::Git(format!(
                "{} is the target branch and cannot be merged into itself",
                request.branch
            )));
        }
        if !git.branch_exists(&request.branch) {
            return Err(Error::Git(format!("branch {} does not exist", request.branch)));
        }
        if !git.is_clean_in(git.root())? {
            return Err(Error::Git(format!(
                "{} has uncommitted changes; commit or stash them before merging",
                git.root().display()
            )));
        }

        git.checkout(&self.target_branch)?;
        if let Some(ref remote) = self.remote {
            if !git.has_remote(remote) {
                return Err(Error::Config(format!(
                    "remote '{}' is not configured in {}",
                    remote,
                    git.root().display()
                )));
            }
            git.fetch(remote, &self.target_branch)?;
            let local = git.branch_tip(&self.target_branch)?;
            let published = git.remote_tip(remote, &self.target_branch)?;
            if !git.is_ancestor(&local, &published)? {
                return Err(Error::Git(format!(
                    "local {target} has commits that are not on {remote}/{target}; \
                     inspect them, then `git reset --hard {remote}/{target}` in {root}",
                    target = self.target_branch,
                    remote = remote,
                    root = git.root().display()
                )));
            }
            git.pull_ff_only(remote, &self.target_branch)?;
        }
        Ok(())
    }

    /// Put the target back where it was before this attempt
    fn restore_target(&self, git: &GitManager, before: &str) {
        if let Err(e) = git.run(&["reset", "--hard", before]) {
            log::warn!("[MergeEngine] Could not restore {}: {}", self.target_branch, e);
        }
    }

    /// Ref to rebase onto, fetched inside the rebase directory when there
    /// is a remote
    fn rebase_onto(&self, git: &GitManager, dir: &Path) -> Result<String> {
        match self.remote {
            Some(ref remote) => {
                git.fetch_in(dir, remote, &self.target_branch)?;
                Ok(format!("{}/{}", remote, self.target_branch))
            }
            None => Ok(self.target_branch.clone()),
        }
    }

    fn land(
        &self,
        git: &GitManager,
        request: &MergeRequest,
        scratch: &mut Option<PathBuf>,
    ) -> Result<MergeOutcome> {
        if git.merge_ff_only(&request.branch)? {
            return Ok(MergeOutcome::Merged {
                commit: git.head_commit()?,
                tier: MergeTier::FastForward,
            });
        }

        let rebase_dir = self.rebase_dir(git, request, scratch)?;
        let onto = self.rebase_onto(git, &rebase_dir)?;
        if git.rebase_in(&rebase_dir, &onto)? {
            if git.merge_ff_only(&request.branch)? {
                return Ok(MergeOutcome::Merged {
                    commit: git.head_commit()?,
                    tier: MergeTier::Rebase,
                });
            }
            log::warn!(
                "[MergeEngine] {} rebased but still cannot fast-forward",
                request.branch
            );
        }

        match git.merge_no_ff(&request.branch)? {
            MergeAttempt::Merged(commit) => Ok(MergeOutcome::Merged {
                commit,
                tier: MergeTier::Merge,
            }),
            MergeAttempt::Conflict(files) => Ok(MergeOutcome::Conflict { files }),
        }
    }

    /// Where the branch is checked out for rebasing; adds a scratch
    /// worktree when it isn't checked out anywhere
    fn rebase_dir(
        &self,
        git: &GitManager,
        request: &MergeRequest,
        scratch: &mut Option<PathBuf>,
    ) -> Result<PathBuf> {
        if let Some(ref worktree) = request.worktree {
            if worktree.exists() {
                return Ok(worktree.clone());
            }
        }
        if let Some(existing) = git.worktree_for_branch(&request.branch)? {
            return Ok(existing);
        }

        let dir = scratch_dir(&self.project_path);
        fs::create_dir_all(&dir)?;
        let path = dir.join(sanitize_branch_name(&request.branch));
        if path.exists() {
            remove_scratch_worktree(git, &path);
        }
        git.add_worktree(&path, &request.branch)?;
        *scratch = Some(path.clone());
        Ok(path)
    }

    /// The merge commit must be reachable from the remote tip (or the local
    /// target tip when there is no remote)
    fn verify(&self, git: &GitManager, commit: &str) -> Result<()> {
        let (tip, target) = match self.remote {
            Some(ref remote) => {
                git.fetch(remote, &self.target_branch)?;
                (
                    git.remote_tip(remote, &self.target_branch)?,
                    format!("{}/{}", remote, self.target_branch),
                )
            }
            None => (
                git.branch_tip(&self.target_branch)?,
                self.target_branch.clone(),
            ),
        };

        if !git.is_ancestor(commit, &tip)? {
            log::error!(
                "[MergeEngine] {} is not contained in {} ({})",
                commit,
                target,
                tip
            );
            return Err(Error::VerificationFailed {
                commit: commit.to_string(),
                target,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{commit_file, git, TestProject};

    fn engine(project: &TestProject) -> MergeEngine {
        MergeEngine::new(&project.root, &project.config(), "test merge")
    }

    #[test]
    fn test_fast_forward_tier_pushes_and_cleans_up() {
        let project = TestProject::with_origin();
        let worktree = project.worktree("op/auth");
        let tip = commit_file(&worktree, "auth.txt", "auth\n", "Add auth");

        let request = MergeRequest::for_branch("op/auth", Some(worktree.clone()));
        let outcome = engine(&project).execute(&request).unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                commit: tip.clone(),
                tier: MergeTier::FastForward
            }
        );
        assert_eq!(project.remote_main(), tip);
        assert!(!worktree.exists());
        let git_manager = GitManager::new(&project.root).unwrap();
        assert!(!git_manager.branch_exists("op/auth"));
    }

    #[test]
    fn test_branch_without_worktree_rebases_in_scratch() {
        let project = TestProject::new();
        git(&project.root, &["checkout", "-q", "-b", "feature"]);
        commit_file(&project.root, "feature.txt", "feature\n", "Feature");
        git(&project.root, &["checkout", "-q", "main"]);
        commit_file(&project.root, "main.txt", "main\n", "Main");

        let outcome = engine(&project)
            .execute(&MergeRequest::for_branch("feature", None))
            .unwrap();

        match outcome {
            MergeOutcome::Merged { commit, tier } => {
                assert_eq!(tier, MergeTier::Rebase);
                assert_eq!(commit, project.head());
            }
            other => panic!("expected merge, got {:?}", other),
        }
        let scratch = scratch_dir(&project.root).join("feature");
        assert!(!scratch.exists());
    }

    #[test]
    fn test_merge_lock_held_fails_fast() {
        let project = TestProject::new();
        let _held = FileLock::new(merge_lock_path(&project.root), "merge-queue daemon")
            .try_acquire()
            .unwrap();
        git(&project.root, &["branch", "feature"]);

        match engine(&project).execute(&MergeRequest::for_branch("feature", None)) {
            Err(Error::LockHeld { holder, .. }) => {
                assert!(holder.starts_with("merge-queue daemon (pid"))
            }
            other => panic!("expected LockHeld, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_branch_aborts_before_mutation() {
        let project = TestProject::new();
        let before = project.head();
        assert!(engine(&project)
            .execute(&MergeRequest::for_branch("ghost", None))
            .is_err());
        assert_eq!(project.head(), before);
    }

    #[test]
    fn test_dirty_root_aborts_before_mutation() {
        let project = TestProject::new();
        git(&project.root, &["branch", "feature"]);
        std::fs::write(project.root.join("test.txt"), "uncommitted\n").unwrap();

        assert!(matches!(
            engine(&project).execute(&MergeRequest::for_branch("feature", None)),
            Err(Error::Git(_))
        ));
    }

    #[test]
    fn test_target_branch_cannot_merge_itself() {
        let project = TestProject::new();
        assert!(engine(&project)
            .execute(&MergeRequest::for_branch("main", None))
            .is_err());
    }

    #[test]
    fn test_push_failure_restores_target() {
        let project = TestProject::with_origin();
        let before = project.head();
        let worktree = project.worktree("op/auth");
        commit_file(&worktree, "auth.txt", "auth\n", "Add auth");

        // A hook on the remote rejects every push
        let hook = project.remote.as_ref().unwrap().join("hooks").join("pre-receive");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let request = MergeRequest::for_branch("op/auth", Some(worktree.clone()));
        assert!(matches!(
            engine(&project).execute(&request),
            Err(Error::Git(_))
        ));
        assert_eq!(project.head(), before);
        assert!(worktree.exists());
    }

    /// Pushes go to a second bare repository, so they succeed without
    /// ever reaching `origin`
    fn divert_pushes(project: &TestProject) -> PathBuf {
        let elsewhere = project.temp.path().join("elsewhere.git");
        git2::Repository::init_bare(&elsewhere).unwrap();
        git(
            &project.root,
            &["config", "remote.origin.pushurl", elsewhere.to_str().unwrap()],
        );
        elsewhere
    }

    #[test]
    fn test_unverified_merge_is_rolled_back() {
        let project = TestProject::with_origin();
        let before = project.head();
        let worktree = project.worktree("op/a");
        let a_tip = commit_file(&worktree, "a.txt", "a\n", "Work on a");
        divert_pushes(&project);

        let request = MergeRequest::for_branch("op/a", Some(worktree.clone()));
        match engine(&project).execute(&request) {
            Err(Error::VerificationFailed { commit, target }) => {
                assert_eq!(commit, a_tip);
                assert_eq!(target, "origin/main");
            }
            other => panic!("expected VerificationFailed, got {:?}", other),
        }
        assert_eq!(project.head(), before);
        assert!(worktree.exists());

        // The next merge must not publish the rejected commit
        git(&project.root, &["config", "--unset", "remote.origin.pushurl"]);
        let other = project.worktree("op/b");
        commit_file(&other, "b.txt", "b\n", "Work on b");
        let outcome = engine(&project)
            .execute(&MergeRequest::for_branch("op/b", Some(other)))
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));

        let git_manager = GitManager::new(&project.root).unwrap();
        assert!(!git_manager
            .is_ancestor(&a_tip, &project.remote_main())
            .unwrap());
    }

    #[test]
    fn test_unpublished_target_commits_block_merging() {
        let project = TestProject::with_origin();
        let published = project.remote_main();
        let local = commit_file(&project.root, "local.txt", "local\n", "Not pushed");
        let worktree = project.worktree("op/auth");
        commit_file(&worktree, "auth.txt", "auth\n", "Add auth");

        let request = MergeRequest::for_branch("op/auth", Some(worktree.clone()));
        match engine(&project).execute(&request) {
            Err(Error::Git(message)) => {
                assert!(message.contains("git reset --hard origin/main"))
            }
            other => panic!("expected refusal, got {:?}", other),
        }
        assert_eq!(project.head(), local);
        assert_eq!(project.remote_main(), published);
        assert!(worktree.exists());
    }

    #[test]
    fn test_rebase_onto_freshly_fetched_remote_target() {
        let project = TestProject::with_origin();
        let worktree = project.worktree("op/auth");
        commit_file(&worktree, "auth.txt", "auth\n", "Add auth");
        let advanced = commit_file(&project.root, "main.txt", "main\n", "Advance main");
        git(&project.root, &["push", "-q", "origin", "main"]);

        let request = MergeRequest::for_branch("op/auth", Some(worktree));
        let commit = match engine(&project).execute(&request).unwrap() {
            MergeOutcome::Merged { commit, tier } => {
                assert_eq!(tier, MergeTier::Rebase);
                commit
            }
            other => panic!("expected merge, got {:?}", other),
        };
        assert_eq!(git(&project.root, &["rev-parse", &format!("{}^", commit)]), advanced);
        assert_eq!(project.remote_main(), commit);
        let git_manager = GitManager::new(&project.root).unwrap();
        assert!(!git_manager.branch_exists("op/auth"));
    }

    #[test]
    fn test_merge_tier_labels() {
        assert_eq!(MergeTier::FastForward.to_string(), "fast_forward");
        assert_eq!(
            serde_json::to_string(&MergeTier::Rebase).unwrap(),
            "\"rebase\""
        );
    }
}
