//! Bulk clone/pull processing.
//!
//! Takes discovered repositories, derives each target directory from its
//! clone URL, applies the update-mode policy for directories that already
//! exist, and runs the per-repository git operations through the bounded
//! batch executor. Failures are collected per repository; one broken
//! repository never halts the batch, and nothing is retried.
//!
//! Force mode only ever removes directories the caller has confirmed in
//! advance: the CLI collects the list of existing targets, prompts once,
//! and passes the confirmed subset in. An unconfirmed existing directory
//! degrades to a skip.

use crate::config::ConfigStore;
use crate::error::{RepoFleetError, Result};
use crate::executor::{BatchExecutor, CancelFlag};
use crate::git::GitRunner;
use crate::layout;
use crate::progress::ProgressSink;
use crate::providers::{Provider, Registry};
use crate::types::{OperationType, ProviderKind, Repository, UpdateMode};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Terminal state of one repository in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Repository was cloned
    Cloned,
    /// Repository was pulled
    Pulled,
    /// Repository was left alone, with the reason
    Skipped(String),
}

/// Result of a bulk batch.
#[derive(Debug)]
pub struct BulkOutcome {
    /// Positional per-repository outcomes; `None` marks a failure slot
    pub results: Vec<Option<ItemOutcome>>,
    /// Collected `(repository name, reason)` failures
    pub failures: Vec<(String, String)>,
    /// Whether the batch was cancelled
    pub cancelled: bool,
}

impl BulkOutcome {
    /// Count of repositories that reached a successful terminal state.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Options for one bulk batch.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Base directory the hierarchical layout is created under
    pub target: PathBuf,
    /// Primary action for repositories without an existing directory
    pub operation: OperationType,
    /// Policy for repositories whose directory already exists
    pub update_mode: UpdateMode,
    /// In-flight ceiling for the batch
    pub concurrency: usize,
    /// Directories force mode is allowed to remove (pre-confirmed)
    pub confirmed_removals: Vec<PathBuf>,
}

/// Bulk clone/pull processor.
pub struct BulkProcessor<'a> {
    registry: &'a Registry,
    config: &'a ConfigStore,
    git: GitRunner,
}

impl<'a> BulkProcessor<'a> {
    /// Create a processor borrowing the process-wide registry and config.
    #[must_use]
    pub fn new(registry: &'a Registry, config: &'a ConfigStore) -> Self {
        Self { registry, config, git: GitRunner::new() }
    }

    /// Compute the target directory for a repository under a base.
    ///
    /// Clone and pull share this derivation, so a repository always maps to
    /// the same directory.
    ///
    /// # Errors
    ///
    /// `Validation` when the clone URL cannot be parsed.
    pub fn target_path(base: &Path, repo: &Repository) -> Result<PathBuf> {
        Ok(layout::derive_path(&repo.clone_url)?.join_under(base))
    }

    /// Target directories that already exist, for the force-mode
    /// confirmation prompt.
    ///
    /// # Errors
    ///
    /// `Validation` when a clone URL cannot be parsed.
    pub fn existing_targets(base: &Path, repos: &[Repository]) -> Result<Vec<PathBuf>> {
        let mut existing = Vec::new();
        for repo in repos {
            let path = Self::target_path(base, repo)?;
            if path.exists() {
                existing.push(path);
            }
        }
        Ok(existing)
    }

    /// Build one provider per repository kind present in the batch, used to
    /// obtain authenticated clone URLs. Multi-provider discovery can hand
    /// us repositories from several providers at once.
    fn build_providers(
        &self,
        repos: &[Repository],
    ) -> HashMap<ProviderKind, Box<dyn Provider>> {
        let kinds: HashSet<ProviderKind> = repos.iter().map(|r| r.provider).collect();
        let mut providers = HashMap::new();

        for kind in kinds {
            // Prefer the default provider's config when the kind matches,
            // otherwise the first configured provider of that kind.
            let mut names: Vec<String> = Vec::new();
            if let Some(default) = self.config.default_provider_name() {
                names.push(default.to_string());
            }
            names.extend(self.config.provider_names());

            let found = names.iter().find_map(|name| {
                let config = self.config.provider(name).ok()?;
                (config.provider_kind().ok()? == kind).then_some(config)
            });
            if let Some(config) = found {
                match self.registry.construct(kind, config) {
                    Ok(provider) => {
                        providers.insert(kind, provider);
                    }
                    Err(e) => {
                        tracing::warn!(kind = %kind, error = %e, "cannot build provider for batch");
                    }
                }
            } else {
                tracing::warn!(kind = %kind, "no configured provider of this type");
            }
        }
        providers
    }

    /// Run the batch.
    ///
    /// Every repository reaches exactly one terminal state: an outcome slot
    /// or a collected failure.
    ///
    /// # Errors
    ///
    /// `FileSystem` when the target base directory cannot be created.
    pub async fn run(
        &self,
        repos: Vec<Repository>,
        options: &BulkOptions,
        cancel: &CancelFlag,
        progress: &dyn ProgressSink,
    ) -> Result<BulkOutcome> {
        tokio::fs::create_dir_all(&options.target)
            .await
            .map_err(|e| RepoFleetError::filesystem(&options.target, e))?;

        let providers = self.build_providers(&repos);
        let confirmed: HashSet<PathBuf> = options.confirmed_removals.iter().cloned().collect();

        let overall = progress.add_task(
            &format!("{} {} repositories", options.operation, repos.len()),
            Some(repos.len() as u64),
        );

        let executor = BatchExecutor::new(options.concurrency);
        let report = executor
            .run_with_hooks(
                repos,
                cancel,
                |_, repo| {
                    let providers = &providers;
                    let confirmed = &confirmed;
                    async move {
                        let item = progress.add_subtask(overall, &repo.name, None);
                        let outcome = self
                            .process_repo(&repo, options, providers, confirmed)
                            .await;
                        // Exactly one terminal transition per repository.
                        match &outcome {
                            Ok(ItemOutcome::Cloned) => progress.finish(item, "cloned"),
                            Ok(ItemOutcome::Pulled) => progress.finish(item, "pulled"),
                            Ok(ItemOutcome::Skipped(reason)) => {
                                progress.finish(item, &format!("skipped: {reason}"));
                            }
                            Err(e) => progress.finish(item, &format!("failed: {e}")),
                        }
                        progress.advance(overall, 1);
                        outcome
                    }
                },
                |_, _| {},
                |repo, error| {
                    tracing::warn!(repo = %repo.name, error = %error, "repository operation failed");
                },
            )
            .await?;

        progress.finish(overall, "batch complete");

        let failures = report
            .errors
            .into_iter()
            .map(|(repo, error)| (repo.name, error.to_string()))
            .collect();
        Ok(BulkOutcome { results: report.results, failures, cancelled: report.cancelled })
    }

    /// Process a single repository through the policy pipeline.
    async fn process_repo(
        &self,
        repo: &Repository,
        options: &BulkOptions,
        providers: &HashMap<ProviderKind, Box<dyn Provider>>,
        confirmed: &HashSet<PathBuf>,
    ) -> Result<ItemOutcome> {
        let path = Self::target_path(&options.target, repo)?;

        if repo.is_disabled {
            tracing::debug!(repo = %repo.name, "repository is disabled, skipping");
            return Ok(ItemOutcome::Skipped("repository is disabled".to_string()));
        }

        if path.exists() {
            return match options.update_mode {
                UpdateMode::Skip => Ok(ItemOutcome::Skipped("folder exists".to_string())),
                UpdateMode::Pull => {
                    if path.join(".git").exists() {
                        self.git.pull(&path).await?;
                        Ok(ItemOutcome::Pulled)
                    } else {
                        Err(RepoFleetError::validation(format!(
                            "folder exists but is not a git repo: {}",
                            path.display()
                        )))
                    }
                }
                UpdateMode::Force => {
                    if !confirmed.contains(&path) {
                        // Not confirmed for removal: degrade to skip.
                        return Ok(ItemOutcome::Skipped(
                            "existing folder not confirmed for removal".to_string(),
                        ));
                    }
                    tokio::fs::remove_dir_all(&path)
                        .await
                        .map_err(|e| RepoFleetError::filesystem(&path, e))?;
                    self.clone_repo(repo, &path, providers).await
                }
            };
        }

        match options.operation {
            OperationType::Clone => self.clone_repo(repo, &path, providers).await,
            // Pull never creates a directory.
            OperationType::Pull => Ok(ItemOutcome::Skipped("Skipped (not found)".to_string())),
        }
    }

    async fn clone_repo(
        &self,
        repo: &Repository,
        path: &Path,
        providers: &HashMap<ProviderKind, Box<dyn Provider>>,
    ) -> Result<ItemOutcome> {
        let provider = providers.get(&repo.provider).ok_or_else(|| {
            RepoFleetError::configuration(format!(
                "no configured provider of type '{}' for repository '{}'",
                repo.provider, repo.name
            ))
        })?;
        let auth_url = provider.authenticated_clone_url(repo)?;

        let parent = path.parent().ok_or_else(|| {
            RepoFleetError::validation(format!("target path has no parent: {}", path.display()))
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RepoFleetError::filesystem(parent, e))?;

        let dir_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            RepoFleetError::validation(format!("target path has no directory name: {}", path.display()))
        })?;

        self.git.clone(&auth_url, parent, Some(dir_name)).await?;
        Ok(ItemOutcome::Cloned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use crate::providers::AuthMethod;
    use crate::types::{Organization, Project, RateLimitInfo, RepoFilters};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::process::Command;
    use tempfile::TempDir;

    /// Provider double whose authenticated clone URL points at a local
    /// bare repository, so clones run offline.
    struct LocalSourceProvider {
        source: PathBuf,
    }

    #[async_trait]
    impl Provider for LocalSourceProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::GitHub
        }
        fn auth_methods(&self) -> &'static [AuthMethod] {
            &[AuthMethod::Pat]
        }
        fn api_version(&self) -> &'static str {
            "test"
        }
        async fn authenticate(&self) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn test_connection(&self) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn list_organizations(&self) -> crate::error::Result<Vec<Organization>> {
            Ok(Vec::new())
        }
        async fn list_projects(&self, _org: &str) -> crate::error::Result<Vec<Project>> {
            Ok(Vec::new())
        }
        fn list_repositories<'b>(
            &'b self,
            _org: &'b str,
            _project: Option<&'b str>,
            _filters: Option<&'b RepoFilters>,
        ) -> BoxStream<'b, crate::error::Result<Repository>> {
            Box::pin(futures::stream::empty())
        }
        async fn get_repository(
            &self,
            org: &str,
            repo: &str,
            _project: Option<&str>,
        ) -> crate::error::Result<Repository> {
            Err(RepoFleetError::RepositoryNotFound { org: org.into(), name: repo.into() })
        }
        fn authenticated_clone_url(&self, _repo: &Repository) -> crate::error::Result<String> {
            Ok(self.source.display().to_string())
        }
        fn supports_projects(&self) -> bool {
            false
        }
        fn rate_limit_info(&self) -> Option<RateLimitInfo> {
            None
        }
    }

    fn git(args: &[&str], cwd: &Path) {
        let output = Command::new("git").args(args).current_dir(cwd).output().unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Create a bare repository with one commit and return its path.
    fn make_bare_source(dir: &Path) -> PathBuf {
        let work = dir.join("work");
        std::fs::create_dir_all(&work).unwrap();
        git(&["init", "-b", "main"], &work);
        git(&["config", "user.email", "test@example.com"], &work);
        git(&["config", "user.name", "Test"], &work);
        std::fs::write(work.join("README.md"), "hello\n").unwrap();
        git(&["add", "."], &work);
        git(&["commit", "-m", "initial"], &work);

        let bare = dir.join("source.git");
        git(&["clone", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()], dir);
        bare
    }

    fn sample_repo(name: &str) -> Repository {
        Repository::new(
            name,
            format!("https://github.com/octo-org/{name}.git"),
            ProviderKind::GitHub,
        )
    }

    fn store() -> ConfigStore {
        ConfigStore::from_yaml(
            r#"
default_provider: gh1
providers:
  gh1:
    url: https://github.com
    user: u
    token: t
"#,
        )
        .unwrap()
    }

    fn options(target: &Path, operation: OperationType, update_mode: UpdateMode) -> BulkOptions {
        BulkOptions {
            target: target.to_path_buf(),
            operation,
            update_mode,
            concurrency: 2,
            confirmed_removals: Vec::new(),
        }
    }

    async fn run_with_local_source(
        repos: Vec<Repository>,
        options: &BulkOptions,
        source: &Path,
    ) -> BulkOutcome {
        let registry = Registry::with_builtin();
        let config = store();
        let processor = BulkProcessor::new(&registry, &config);
        let mut providers: HashMap<ProviderKind, Box<dyn Provider>> = HashMap::new();
        providers
            .insert(ProviderKind::GitHub, Box::new(LocalSourceProvider { source: source.into() }));

        // Inline copy of `run` wiring with injected providers.
        tokio::fs::create_dir_all(&options.target).await.unwrap();
        let confirmed: HashSet<PathBuf> = options.confirmed_removals.iter().cloned().collect();
        let executor = BatchExecutor::new(options.concurrency);
        let report = executor
            .run(repos, &CancelFlag::new(), |_, repo| {
                let providers = &providers;
                let confirmed = &confirmed;
                let processor = &processor;
                async move { processor.process_repo(&repo, options, providers, confirmed).await }
            })
            .await
            .unwrap();
        BulkOutcome {
            results: report.results,
            failures: report
                .errors
                .into_iter()
                .map(|(repo, error)| (repo.name, error.to_string()))
                .collect(),
            cancelled: report.cancelled,
        }
    }

    #[tokio::test]
    async fn test_clone_into_hierarchical_layout() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let outcome = run_with_local_source(
            vec![sample_repo("svc-api"), sample_repo("svc-web")],
            &options(&target, OperationType::Clone, UpdateMode::Skip),
            &source,
        )
        .await;

        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        assert_eq!(outcome.results, vec![Some(ItemOutcome::Cloned), Some(ItemOutcome::Cloned)]);
        for name in ["svc-api", "svc-web"] {
            let path = target.join("github.com").join("octo-org").join("repos").join(name);
            assert!(path.join(".git").exists(), "missing {}", path.display());
        }
    }

    #[tokio::test]
    async fn test_skip_mode_leaves_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let existing =
            target.join("github.com").join("octo-org").join("repos").join("svc-api");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("marker.txt"), "keep me").unwrap();

        let outcome = run_with_local_source(
            vec![sample_repo("svc-api")],
            &options(&target, OperationType::Clone, UpdateMode::Skip),
            &source,
        )
        .await;

        assert_eq!(outcome.results[0], Some(ItemOutcome::Skipped("folder exists".into())));
        assert!(existing.join("marker.txt").exists());
    }

    #[tokio::test]
    async fn test_pull_mode_pulls_existing_clone() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        // First batch clones; second batch with pull mode pulls.
        let opts = options(&target, OperationType::Clone, UpdateMode::Pull);
        let outcome =
            run_with_local_source(vec![sample_repo("svc-api")], &opts, &source).await;
        assert_eq!(outcome.results[0], Some(ItemOutcome::Cloned));

        let outcome =
            run_with_local_source(vec![sample_repo("svc-api")], &opts, &source).await;
        assert_eq!(outcome.results[0], Some(ItemOutcome::Pulled));
    }

    #[tokio::test]
    async fn test_pull_mode_rejects_non_git_directory() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let existing =
            target.join("github.com").join("octo-org").join("repos").join("svc-api");
        std::fs::create_dir_all(&existing).unwrap();

        let outcome = run_with_local_source(
            vec![sample_repo("svc-api")],
            &options(&target, OperationType::Clone, UpdateMode::Pull),
            &source,
        )
        .await;

        assert_eq!(outcome.results[0], None);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].1.contains("not a git repo"));
    }

    #[tokio::test]
    async fn test_force_mode_requires_confirmation() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let existing =
            target.join("github.com").join("octo-org").join("repos").join("svc-api");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("marker.txt"), "precious").unwrap();

        // Unconfirmed: degrade to skip, directory untouched.
        let outcome = run_with_local_source(
            vec![sample_repo("svc-api")],
            &options(&target, OperationType::Clone, UpdateMode::Force),
            &source,
        )
        .await;
        assert!(matches!(outcome.results[0], Some(ItemOutcome::Skipped(_))));
        assert!(existing.join("marker.txt").exists());

        // Confirmed: removed and re-cloned.
        let mut opts = options(&target, OperationType::Clone, UpdateMode::Force);
        opts.confirmed_removals = vec![existing.clone()];
        let outcome =
            run_with_local_source(vec![sample_repo("svc-api")], &opts, &source).await;
        assert_eq!(outcome.results[0], Some(ItemOutcome::Cloned));
        assert!(!existing.join("marker.txt").exists());
        assert!(existing.join(".git").exists());
    }

    #[tokio::test]
    async fn test_disabled_repo_is_never_touched() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let mut repo = sample_repo("svc-api");
        repo.is_disabled = true;

        let outcome = run_with_local_source(
            vec![repo],
            &options(&target, OperationType::Clone, UpdateMode::Force),
            &source,
        )
        .await;

        assert_eq!(
            outcome.results[0],
            Some(ItemOutcome::Skipped("repository is disabled".into()))
        );
        assert!(!target.join("github.com").join("octo-org").join("repos").join("svc-api").exists());
    }

    #[tokio::test]
    async fn test_pull_operation_never_creates_directories() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        let outcome = run_with_local_source(
            vec![sample_repo("svc-api")],
            &options(&target, OperationType::Pull, UpdateMode::Pull),
            &source,
        )
        .await;

        assert_eq!(outcome.results[0], Some(ItemOutcome::Skipped("Skipped (not found)".into())));
        assert!(!target.join("github.com").exists() || {
            // The base target exists, but no repository directory was made.
            !target.join("github.com").join("octo-org").join("repos").join("svc-api").exists()
        });
    }

    #[tokio::test]
    async fn test_failure_is_collected_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let source = make_bare_source(tmp.path());
        let target = tmp.path().join("target");

        // Second repo has an unparseable clone URL: per-repo failure.
        let mut bad = sample_repo("bad");
        bad.clone_url = "ftp://nowhere/bad".into();

        let outcome = run_with_local_source(
            vec![sample_repo("svc-api"), bad],
            &options(&target, OperationType::Clone, UpdateMode::Skip),
            &source,
        )
        .await;

        assert_eq!(outcome.results[0], Some(ItemOutcome::Cloned));
        assert_eq!(outcome.results[1], None);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "bad");
    }

    #[test]
    fn test_existing_targets_lists_only_present_dirs() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path();
        let existing = target.join("github.com").join("octo-org").join("repos").join("svc-api");
        std::fs::create_dir_all(&existing).unwrap();

        let repos = vec![sample_repo("svc-api"), sample_repo("svc-web")];
        let found = BulkProcessor::existing_targets(target, &repos).unwrap();
        assert_eq!(found, vec![existing]);
    }
}
