//! Integration tests for RepoFleet.
//!
//! These tests exercise the layout derivation, query matching, status
//! scanning, and the CLI binary end to end. Status tests drive the real
//! `git` binary inside temporary directories.

use repofleet::{CancelFlag, NoopSink, StatusScanner};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git").args(args).current_dir(cwd).output().unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn init_repo(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    git(&["init", "-b", "main"], path);
    git(&["config", "user.email", "test@example.com"], path);
    git(&["config", "user.name", "Test"], path);
    std::fs::write(path.join("README.md"), "hello\n").unwrap();
    git(&["add", "."], path);
    git(&["commit", "-m", "initial"], path);
}

/// Clone `source` (bare) to `dest` and configure an identity.
fn clone_repo(source: &Path, dest: &Path) {
    git(
        &["clone", source.to_str().unwrap(), dest.to_str().unwrap()],
        source.parent().unwrap(),
    );
    git(&["config", "user.email", "test@example.com"], dest);
    git(&["config", "user.name", "Test"], dest);
}

mod layout_tests {
    use repofleet::layout::derive_path;

    #[test]
    fn test_same_repo_same_directory_for_clone_and_pull() {
        let url = "https://dev.azure.com/myorg/platform/_git/billing";
        let first = derive_path(url).unwrap();
        let second = derive_path(url).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.segments(), ["dev.azure.com", "myorg", "platform", "billing"]);
    }

    #[test]
    fn test_ssh_and_https_forms_agree() {
        let https = derive_path("https://github.com/octo-org/svc-api.git").unwrap();
        let ssh = derive_path("git@github.com:octo-org/svc-api.git").unwrap();
        assert_eq!(https, ssh);
    }

    #[test]
    fn test_four_levels_always() {
        for url in [
            "https://github.com/o/r",
            "https://bitbucket.org/w/r",
            "https://bitbucket.org/w/p/r",
            "https://dev.azure.com/o/_git/r",
            "git@ssh.dev.azure.com:v3/o/p/r",
            "https://git.example.com/team/repo.git",
        ] {
            let path = derive_path(url).unwrap();
            assert_eq!(path.segments().len(), 4, "{url}");
            assert!(path.segments().iter().all(|s| !s.is_empty()), "{url}");
        }
    }
}

mod query_tests {
    use repofleet::query::{matches, QueryPattern};

    #[test]
    fn test_discovery_results_satisfy_the_query() {
        // Property: a repository matches iff every level matches.
        let query = QueryPattern::parse("octo-*/repos/svc-?pi").unwrap();
        assert!(matches(&query.org, "octo-org"));
        assert!(matches(&query.project, "repos"));
        assert!(matches(&query.repo, "svc-api"));
        assert!(!matches(&query.repo, "svc-webapp"));
    }

    #[test]
    fn test_round_trip() {
        let query = QueryPattern::parse("a/b*/c?").unwrap();
        assert_eq!(QueryPattern::parse(&query.to_string()).unwrap(), query);
    }
}

mod status_tests {
    use super::*;

    /// Mixed tree: a clean clone, a dirty tree, and a repo one commit
    /// ahead of its remote.
    #[tokio::test]
    async fn test_status_on_mixed_tree() {
        let tmp = TempDir::new().unwrap();

        // Shared upstream for the "ahead" case.
        let upstream_work = tmp.path().join("upstream-work");
        init_repo(&upstream_work);
        let bare = tmp.path().join("upstream.git");
        git(
            &["clone", "--bare", upstream_work.to_str().unwrap(), bare.to_str().unwrap()],
            tmp.path(),
        );

        let root = tmp.path().join("root");
        std::fs::create_dir_all(&root).unwrap();

        let ahead = root.join("ahead");
        clone_repo(&bare, &ahead);
        std::fs::write(ahead.join("new.txt"), "local commit\n").unwrap();
        git(&["add", "."], &ahead);
        git(&["commit", "-m", "local only"], &ahead);

        let clean = root.join("clean");
        clone_repo(&bare, &clean);

        let dirty = root.join("dirty");
        init_repo(&dirty);
        std::fs::write(dirty.join("scratch.txt"), "wip\n").unwrap();

        let scanner = StatusScanner::new(3, false);
        let statuses = scanner.scan(&root, &CancelFlag::new(), &NoopSink).await.unwrap();

        assert_eq!(statuses.len(), 3);
        // Sorted by path: ahead, clean, dirty.
        assert!(statuses[0].path.ends_with("ahead"));
        assert_eq!(statuses[0].ahead, 1);
        assert!(!statuses[0].is_clean);

        assert!(statuses[1].path.ends_with("clean"));
        assert!(statuses[1].is_clean);
        assert_eq!(statuses[1].ahead + statuses[1].behind, 0);
        assert_eq!(
            statuses[1].modified + statuses[1].untracked + statuses[1].staged,
            0
        );

        assert!(statuses[2].path.ends_with("dirty"));
        assert_eq!(statuses[2].untracked, 1);
        assert!(!statuses[2].is_clean);

        assert!(repofleet::status::any_dirty(&statuses));
    }

    #[tokio::test]
    async fn test_fresh_clone_is_clean() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        init_repo(&work);
        let bare = tmp.path().join("origin.git");
        git(&["clone", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()], tmp.path());

        let root = tmp.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        clone_repo(&bare, &root.join("fresh"));

        let scanner = StatusScanner::new(2, false);
        let statuses = scanner.scan(&root, &CancelFlag::new(), &NoopSink).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_clean);
        assert_eq!(statuses[0].branch, "main");
        assert_eq!(statuses[0].remote_branch.as_deref(), Some("origin/main"));
    }

    #[tokio::test]
    async fn test_json_report_fields() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        init_repo(&root.join("repo"));

        let scanner = StatusScanner::new(1, false);
        let statuses = scanner.scan(&root, &CancelFlag::new(), &NoopSink).await.unwrap();
        let json = repofleet::status::render_json(&statuses).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let record = &value[0];
        for field in
            ["path", "is_clean", "branch", "remote_branch", "ahead", "behind", "modified",
             "untracked", "staged", "error"]
        {
            assert!(record.get(field).is_some(), "missing field {field}");
        }
    }
}

mod config_tests {
    use repofleet::ConfigStore;

    #[test]
    fn test_config_loading() {
        let yaml = r#"
default_provider: gh1
providers:
  gh1:
    url: https://github.com
    user: me
    token: tok
"#;
        let store = ConfigStore::from_yaml(yaml).unwrap();
        assert_eq!(store.default_provider_name(), Some("gh1"));
        store.validate().unwrap();
    }

    #[test]
    fn test_example_config_round_trips() {
        let store = ConfigStore::from_yaml(&ConfigStore::example_yaml()).unwrap();
        store.validate().unwrap();
    }
}

mod cli_tests {
    use super::*;
    use assert_cmd::Command as AssertCommand;
    use predicates::prelude::*;

    #[test]
    fn test_help_runs() {
        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("bulk Git repository manager"));
    }

    #[test]
    fn test_init_then_validate() {
        let tmp = TempDir::new().unwrap();
        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .current_dir(tmp.path())
            .arg("init")
            .assert()
            .success();
        assert!(tmp.path().join("repofleet.yaml").exists());

        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .current_dir(tmp.path())
            .args(["validate", "repofleet.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("valid"));

        // Second init refuses to overwrite.
        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .current_dir(tmp.path())
            .arg("init")
            .assert()
            .failure();
    }

    #[test]
    fn test_status_fail_on_dirty_exit_code() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        init_repo(&root.join("dirty"));
        std::fs::write(root.join("dirty").join("scratch.txt"), "wip\n").unwrap();

        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .args(["status", root.to_str().unwrap(), "--fail-on-dirty"])
            .assert()
            .code(1);
    }

    #[test]
    fn test_status_clean_tree_exits_zero() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        init_repo(&root.join("clean"));

        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .args(["status", root.to_str().unwrap(), "--fail-on-dirty", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"is_clean\": true"));
    }

    #[test]
    fn test_invalid_query_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("repofleet.yaml"),
            "default_provider: gh1\nproviders:\n  gh1:\n    url: https://github.com\n    user: u\n    token: t\n",
        )
        .unwrap();

        // Four segments: rejected before any network work, exit code 7.
        AssertCommand::cargo_bin("repofleet")
            .unwrap()
            .current_dir(tmp.path())
            .args(["list", "a/b/c/d"])
            .assert()
            .code(7);
    }
}
