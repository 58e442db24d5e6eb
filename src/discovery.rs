//! Query-driven repository discovery.
//!
//! The engine fans a parsed query out across one or more providers,
//! filters at each level (organization, project, repository), and streams
//! matches through a bounded channel so a result limit stops pagination
//! early. Failures of a single provider or organization are logged and the
//! rest of the fan-out continues.
//!
//! # Dispatch
//!
//! The first query segment doubles as the dispatch key:
//!
//! 1. No explicit provider and the first segment contains `*`/`?`: the
//!    segment is a provider-name pattern; the remaining segments bind to
//!    project and repository and every matching provider is scanned.
//! 2. An explicit provider name: exactly that configuration is used.
//! 3. Otherwise the default provider is used.
//!
//! Combining an explicit provider with a wildcard first segment is a
//! validation error.

use crate::config::ConfigStore;
use crate::error::{RepoFleetError, Result};
use crate::progress::{ProgressSink, TaskId};
use crate::providers::{Provider, Registry};
use crate::query::{self, QueryPattern};
use crate::types::{Organization, RepoFilters, RepoListing, Repository};
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Ceiling on concurrently scanned providers in multi-provider mode.
const PROVIDER_FAN_OUT_LIMIT: usize = 4;

/// Channel depth between producers and the draining consumer.
const STREAM_BUFFER: usize = 64;

/// One discovery match: the repository plus where it was found.
#[derive(Debug, Clone)]
pub struct DiscoveredRepo {
    /// The repository record
    pub repository: Repository,
    /// Organization it was listed under
    pub organization: String,
    /// Project it was listed under, for providers with projects
    pub project: Option<String>,
}

impl DiscoveredRepo {
    /// Convert into the JSON listing row.
    #[must_use]
    pub fn to_listing(&self) -> RepoListing {
        RepoListing {
            organization: self.organization.clone(),
            project: self.project.clone(),
            repository: self.repository.name.clone(),
            clone_url: self.repository.clone_url.clone(),
            ssh_url: self.repository.ssh_url.clone(),
            default_branch: self.repository.default_branch.clone(),
            is_private: self.repository.is_private,
            description: self.repository.description.clone(),
        }
    }
}

/// How a query resolved to concrete provider scans.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DiscoveryPlan {
    /// (provider name, per-provider query) pairs
    pub selected: Vec<(String, QueryPattern)>,
    /// Whether multi-provider dispatch was used
    pub multi: bool,
}

/// A provider ready to be scanned.
pub(crate) struct ProviderJob {
    pub name: String,
    pub provider: Box<dyn Provider>,
    pub query: QueryPattern,
}

/// Discovery engine over a registry and configuration store.
pub struct DiscoveryEngine<'a> {
    registry: &'a Registry,
    config: &'a ConfigStore,
}

impl<'a> DiscoveryEngine<'a> {
    /// Create an engine borrowing the process-wide registry and config.
    #[must_use]
    pub fn new(registry: &'a Registry, config: &'a ConfigStore) -> Self {
        Self { registry, config }
    }

    /// Resolve the dispatch decision for a raw query.
    pub(crate) fn plan(&self, raw_query: &str, provider: Option<&str>) -> Result<DiscoveryPlan> {
        let parsed = QueryPattern::parse(raw_query)?;
        let first = QueryPattern::first_segment(raw_query);

        if query::has_wildcards(first) {
            if let Some(name) = provider {
                return Err(RepoFleetError::validation(format!(
                    "a wildcard first segment selects providers by pattern and cannot be \
                     combined with --provider {name}"
                )));
            }
            // Multi-provider: first segment matches provider names; the
            // remaining segments bind to project and repository.
            let sub_query = QueryPattern {
                org: "*".to_string(),
                project: parsed.project,
                repo: parsed.repo,
            };
            let selected = self
                .config
                .provider_names()
                .into_iter()
                .filter(|name| query::matches(first, name))
                .map(|name| (name, sub_query.clone()))
                .collect();
            return Ok(DiscoveryPlan { selected, multi: true });
        }

        let name = match provider {
            Some(name) => {
                self.config.provider(name)?;
                name.to_string()
            }
            None => self
                .config
                .default_provider_name()
                .ok_or_else(|| {
                    RepoFleetError::configuration(
                        "no provider given and no default_provider configured",
                    )
                })?
                .to_string(),
        };
        Ok(DiscoveryPlan { selected: vec![(name, parsed)], multi: false })
    }

    /// Run a query and collect every matching repository.
    ///
    /// `limit` is a hard stop across the whole fan-out. Progress is
    /// rendered on the given sink; pass a no-op sink for machine-readable
    /// output.
    ///
    /// # Errors
    ///
    /// Validation and configuration problems fail immediately. In
    /// single-provider mode a provider failure is returned; in
    /// multi-provider mode it is logged and the other providers continue.
    pub async fn discover(
        &self,
        raw_query: &str,
        provider: Option<&str>,
        limit: Option<usize>,
        filters: Option<&RepoFilters>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<DiscoveredRepo>> {
        let plan = self.plan(raw_query, provider)?;
        if plan.selected.is_empty() {
            tracing::info!(query = raw_query, "no configured provider matches the query");
            return Ok(Vec::new());
        }

        let mut jobs = Vec::with_capacity(plan.selected.len());
        for (name, sub_query) in plan.selected {
            match self.registry.provider_from_config(&name, self.config) {
                Ok(provider) => jobs.push(ProviderJob { name, provider, query: sub_query }),
                Err(e) if plan.multi => {
                    tracing::warn!(provider = %name, error = %e, "skipping unbuildable provider");
                }
                Err(e) => return Err(e),
            }
        }

        let (results, errors) = fan_out(jobs, limit, filters, progress).await;

        if !plan.multi {
            if let Some((_, error)) = errors.into_iter().next() {
                return Err(error);
            }
        }
        Ok(results)
    }
}

/// Scan all provider jobs concurrently, draining matches through a bounded
/// channel until `limit` is reached. Returns the matches and the collected
/// per-provider errors.
pub(crate) async fn fan_out(
    jobs: Vec<ProviderJob>,
    limit: Option<usize>,
    filters: Option<&RepoFilters>,
    progress: &dyn ProgressSink,
) -> (Vec<DiscoveredRepo>, Vec<(String, RepoFleetError)>) {
    let overall = progress.add_task("Discovering repositories", None);
    let concurrency = PROVIDER_FAN_OUT_LIMIT.min(jobs.len().max(1));
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::channel::<DiscoveredRepo>(STREAM_BUFFER);

    let producers = {
        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let tx = tx.clone();
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return None;
                    };
                    let task = progress.add_subtask(overall, &job.name, None);
                    let outcome =
                        scan_provider(job.provider.as_ref(), &job.query, filters, &tx, progress, task)
                            .await;
                    job.provider.close().await;
                    match outcome {
                        Ok(found) => {
                            progress.finish(task, &format!("{}: {} repos", job.name, found));
                            None
                        }
                        Err(e) => {
                            progress.finish(task, &format!("{}: failed", job.name));
                            tracing::warn!(provider = %job.name, error = %e, "provider scan failed");
                            Some((job.name, e))
                        }
                    }
                }
            })
            .collect();
        async move {
            let failures: Vec<_> = join_all(tasks).await.into_iter().flatten().collect();
            drop(tx);
            failures
        }
    };

    let consumer = async {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
            progress.advance(overall, 1);
            if limit.is_some_and(|limit| out.len() >= limit) {
                tracing::debug!(limit = out.len(), "result limit reached, stopping fan-out");
                break;
            }
        }
        // Dropping the receiver here cancels the producer side.
        drop(rx);
        out
    };

    let (errors, results) = tokio::join!(producers, consumer);
    progress.finish(overall, &format!("{} repositories", results.len()));
    (results, errors)
}

/// Scan one provider: authenticate, filter organizations, walk projects,
/// and stream matching repositories into the channel. Returns the number
/// of repositories sent.
async fn scan_provider(
    provider: &dyn Provider,
    query: &QueryPattern,
    filters: Option<&RepoFilters>,
    tx: &mpsc::Sender<DiscoveredRepo>,
    progress: &dyn ProgressSink,
    task: TaskId,
) -> Result<usize> {
    provider.authenticate().await?;

    let orgs: Vec<Organization> = provider
        .list_organizations()
        .await?
        .into_iter()
        .filter(|org| query::matches(&query.org, &org.name))
        .collect();

    let mut found = 0;
    for org in orgs {
        match scan_org(provider, &org, query, filters, tx, progress, task).await {
            Ok(count) => found += count,
            Err(e) => {
                if tx.is_closed() {
                    return Ok(found);
                }
                // One broken organization never halts the batch.
                tracing::warn!(
                    org = %org.name,
                    error = %e,
                    "skipping organization after error"
                );
            }
        }
    }
    Ok(found)
}

async fn scan_org(
    provider: &dyn Provider,
    org: &Organization,
    query: &QueryPattern,
    filters: Option<&RepoFilters>,
    tx: &mpsc::Sender<DiscoveredRepo>,
    progress: &dyn ProgressSink,
    task: TaskId,
) -> Result<usize> {
    if !provider.supports_projects() {
        return stream_repos(provider, org, None, query, filters, tx, progress, task).await;
    }

    let projects = provider.list_projects(&org.name).await?;
    if projects.is_empty() {
        // No project level in this org: list repositories directly.
        return stream_repos(provider, org, None, query, filters, tx, progress, task).await;
    }

    let matched: Vec<_> =
        projects.into_iter().filter(|p| query::matches(&query.project, &p.name)).collect();
    if matched.is_empty() {
        tracing::debug!(
            org = %org.name,
            pattern = %query.project,
            "no project matches the pattern, skipping organization"
        );
        return Ok(0);
    }

    let mut found = 0;
    for project in matched {
        found +=
            stream_repos(provider, org, Some(project.name), query, filters, tx, progress, task)
                .await?;
        if tx.is_closed() {
            break;
        }
    }
    Ok(found)
}

#[allow(clippy::too_many_arguments)]
async fn stream_repos(
    provider: &dyn Provider,
    org: &Organization,
    project: Option<String>,
    query: &QueryPattern,
    filters: Option<&RepoFilters>,
    tx: &mpsc::Sender<DiscoveredRepo>,
    progress: &dyn ProgressSink,
    task: TaskId,
) -> Result<usize> {
    let mut stream = provider.list_repositories(&org.name, project.as_deref(), filters);
    let mut found = 0;
    while let Some(item) = stream.next().await {
        // Repositories already yielded survive an error mid-pagination.
        let repo = item?;
        if !query::matches(&query.repo, &repo.name) {
            continue;
        }
        found += 1;
        progress.set_message(task, &repo.name);
        progress.advance(task, 1);
        let discovered = DiscoveredRepo {
            repository: repo,
            organization: org.name.clone(),
            project: project.clone(),
        };
        if tx.send(discovered).await.is_err() {
            // Consumer hit its limit and hung up.
            return Ok(found);
        }
    }
    Ok(found)
}
