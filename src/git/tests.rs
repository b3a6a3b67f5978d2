//! Tests for GitManager
//!
//! Every test builds a throwaway repository with a `main` branch; the remote
//! ones add a bare repository as `origin`.

#[cfg(test)]
mod tests {
    use crate::git::worktrees::parse_worktree_list;
    use crate::git::{GitManager, MergeAttempt};
    use crate::test_support::{commit_file, git, TestProject};
    use std::fs;
    use std::path::PathBuf;

    fn setup_test_repo() -> (TestProject, PathBuf, GitManager) {
        let project = TestProject::new();
        let root = project.root.clone();
        let manager = GitManager::new(&root).unwrap();
        (project, root, manager)
    }

    fn setup_with_origin() -> (TestProject, PathBuf, GitManager) {
        let project = TestProject::with_origin();
        let root = project.root.clone();
        let manager = GitManager::new(&root).unwrap();
        (project, root, manager)
    }

    #[test]
    fn test_current_branch_and_tip() {
        let (_project, _repo_path, manager) = setup_test_repo();
        assert_eq!(manager.current_branch().unwrap().as_deref(), Some("main"));
        assert_eq!(manager.branch_tip("main").unwrap(), manager.head_commit().unwrap());
        assert!(!manager.branch_exists("nope"));
    }

    #[test]
    fn test_fast_forward() {
        let (_project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        commit_file(&repo_path, "feature.txt", "feature\n", "Add feature");
        let feature_tip = manager.branch_tip("feature").unwrap();
        manager.checkout("main").unwrap();

        assert!(manager.merge_ff_only("feature").unwrap());
        assert_eq!(manager.head_commit().unwrap(), feature_tip);
    }

    #[test]
    fn test_fast_forward_refused_on_divergence() {
        let (_project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        commit_file(&repo_path, "feature.txt", "feature\n", "Add feature");
        manager.checkout("main").unwrap();
        commit_file(&repo_path, "main.txt", "main\n", "Advance main");
        let main_tip = manager.head_commit().unwrap();

        assert!(!manager.merge_ff_only("feature").unwrap());
        assert_eq!(manager.head_commit().unwrap(), main_tip);
    }

    #[test]
    fn test_rebase_in_worktree_then_fast_forward() {
        let (project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["branch", "feature"]);
        let worktree = project.temp.path().join("wt-feature");
        manager.add_worktree(&worktree, "feature").unwrap();
        commit_file(&worktree, "feature.txt", "feature\n", "Add feature");
        commit_file(&repo_path, "main.txt", "main\n", "Advance main");

        assert!(manager.rebase_in(&worktree, "main").unwrap());
        let rebased = manager.head_commit_in(&worktree).unwrap();
        assert!(manager.merge_ff_only("feature").unwrap());
        assert_eq!(manager.head_commit().unwrap(), rebased);
    }

    #[test]
    fn test_conflicting_merge_is_aborted_cleanly() {
        let (_project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        commit_file(&repo_path, "test.txt", "feature side\n", "Feature edit");
        manager.checkout("main").unwrap();
        commit_file(&repo_path, "test.txt", "main side\n", "Main edit");
        let main_tip = manager.head_commit().unwrap();

        match manager.merge_no_ff("feature").unwrap() {
            MergeAttempt::Conflict(files) => assert_eq!(files, vec!["test.txt"]),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(manager.is_clean_in(&repo_path).unwrap());
        assert_eq!(manager.head_commit().unwrap(), main_tip);
        assert_eq!(
            fs::read_to_string(repo_path.join("test.txt")).unwrap(),
            "main side\n"
        );
    }

    #[test]
    fn test_failed_rebase_is_aborted() {
        let (project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["branch", "feature"]);
        let worktree = project.temp.path().join("wt-feature");
        manager.add_worktree(&worktree, "feature").unwrap();
        commit_file(&worktree, "test.txt", "feature side\n", "Feature edit");
        commit_file(&repo_path, "test.txt", "main side\n", "Main edit");
        let before = manager.head_commit_in(&worktree).unwrap();

        assert!(!manager.rebase_in(&worktree, "main").unwrap());
        assert_eq!(manager.head_commit_in(&worktree).unwrap(), before);
        assert!(manager.is_clean_in(&worktree).unwrap());
    }

    #[test]
    fn test_merge_commit_when_histories_diverge() {
        let (_project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["checkout", "-q", "-b", "feature"]);
        commit_file(&repo_path, "feature.txt", "feature\n", "Add feature");
        let feature_tip = manager.branch_tip("feature").unwrap();
        manager.checkout("main").unwrap();
        commit_file(&repo_path, "main.txt", "main\n", "Advance main");

        let commit = match manager.merge_no_ff("feature").unwrap() {
            MergeAttempt::Merged(commit) => commit,
            other => panic!("expected merge, got {:?}", other),
        };
        assert!(manager.is_ancestor(&feature_tip, &commit).unwrap());
    }

    #[test]
    fn test_push_and_verify_against_remote() {
        let (_project, repo_path, manager) = setup_with_origin();
        assert!(manager.has_remote("origin"));

        commit_file(&repo_path, "new.txt", "new\n", "New work");
        let head = manager.head_commit().unwrap();
        manager.push_head("origin", "main").unwrap();
        manager.fetch("origin", "main").unwrap();

        let tip = manager.remote_tip("origin", "main").unwrap();
        assert_eq!(tip, head);
        assert!(manager.is_ancestor(&head, &tip).unwrap());
    }

    #[test]
    fn test_fetch_in_worktree_updates_remote_tracking_ref() {
        let (project, repo_path, manager) = setup_with_origin();
        let worktree = project.worktree("feature");

        // Published by someone else straight to origin
        let other = project.temp.path().join("other");
        let remote = project.remote.as_ref().unwrap();
        git(
            project.temp.path(),
            &["clone", "-q", "-b", "main", remote.to_str().unwrap(), other.to_str().unwrap()],
        );
        git(&other, &["config", "user.name", "Other"]);
        git(&other, &["config", "user.email", "other@example.com"]);
        git(&other, &["config", "commit.gpgsign", "false"]);
        let published = commit_file(&other, "other.txt", "other\n", "Other work");
        git(&other, &["push", "-q", "origin", "main"]);

        manager.fetch_in(&worktree, "origin", "main").unwrap();
        assert_eq!(manager.remote_tip("origin", "main").unwrap(), published);
        assert_ne!(manager.branch_tip("main").unwrap(), published);
        assert!(repo_path.join("test.txt").exists());
    }

    #[test]
    fn test_remote_branch_lifecycle() {
        let (_project, repo_path, manager) = setup_with_origin();
        git(&repo_path, &["push", "-q", "origin", "main:refs/heads/feature"]);

        assert!(manager.remote_branch_exists("origin", "feature").unwrap());
        manager.delete_remote_branch("origin", "feature").unwrap();
        assert!(!manager.remote_branch_exists("origin", "feature").unwrap());
    }

    #[test]
    fn test_unrelated_commit_is_not_ancestor() {
        let (_project, repo_path, manager) = setup_test_repo();
        let base = manager.head_commit().unwrap();
        git(&repo_path, &["checkout", "-q", "-b", "side"]);
        commit_file(&repo_path, "side.txt", "side\n", "Side");
        let side = manager.head_commit().unwrap();

        assert!(manager.is_ancestor(&base, &side).unwrap());
        assert!(!manager.is_ancestor(&side, &base).unwrap());
    }

    #[test]
    fn test_worktree_add_list_remove() {
        let (project, repo_path, manager) = setup_test_repo();
        git(&repo_path, &["branch", "feature"]);
        let worktree = project.temp.path().join("wt-feature");

        manager.add_worktree(&worktree, "feature").unwrap();
        let found = manager.worktree_for_branch("feature").unwrap().unwrap();
        assert_eq!(
            found.canonicalize().unwrap(),
            worktree.canonicalize().unwrap()
        );

        manager.remove_worktree(&worktree).unwrap();
        assert!(!worktree.exists());
        assert!(manager.worktree_for_branch("feature").unwrap().is_none());
        manager.delete_branch("feature").unwrap();
        assert!(!manager.branch_exists("feature"));
    }

    #[test]
    fn test_parse_worktree_list() {
        let stdout = "worktree /repo\nHEAD 1111\nbranch refs/heads/main\n\n\
                      worktree /repo/wt\nHEAD 2222\ndetached\n";
        let worktrees = parse_worktree_list(stdout);
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
        assert_eq!(worktrees[1].path, PathBuf::from("/repo/wt"));
        assert_eq!(worktrees[1].head.as_deref(), Some("2222"));
        assert!(worktrees[1].branch.is_none());
    }
}
