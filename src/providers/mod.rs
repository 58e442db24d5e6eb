//! Provider abstraction layer.
//!
//! A [`Provider`] is a uniform capability contract over the hosting
//! services' REST APIs:
//!
//! - Azure DevOps
//! - GitHub
//! - BitBucket Cloud
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Registry                                 │
//! │  - name → constructor dispatch                                  │
//! │  - URL-pattern detection                                        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Provider (trait)                           │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!     ┌─────────┐        ┌─────────┐        ┌──────────┐
//!     │  Azure  │        │ GitHub  │        │BitBucket │
//!     │ DevOps  │        │         │        │  Cloud   │
//!     └─────────┘        └─────────┘        └──────────┘
//! ```
//!
//! Provider instances are created per operation from a named configuration,
//! hold a single HTTP client, and are dropped when the operation ends; they
//! are never cached across batches. Authentication happens lazily, exactly
//! once per instance.

mod azure_devops;
mod bitbucket;
mod github;
mod registry;

pub use azure_devops::AzureDevOpsProvider;
pub use bitbucket::BitBucketProvider;
pub use github::GitHubProvider;
pub use registry::Registry;

use crate::error::{RepoFleetError, Result};
use crate::types::{Organization, Project, ProviderKind, RateLimitInfo, RepoFilters, Repository};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Supported authentication mechanisms, declared per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Personal access token in the Authorization header
    Pat,
    /// HTTP Basic with username and password/PAT
    Basic,
    /// HTTP Basic with username and app password
    AppPassword,
}

/// The uniform capability set every provider implements.
///
/// All network-touching methods are async. `list_repositories` is a lazy
/// stream: pages are fetched on demand as the consumer pulls, which gives
/// natural backpressure and keeps pagination sequential per provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider tag this instance implements.
    fn kind(&self) -> ProviderKind;

    /// Authentication mechanisms this provider supports.
    fn auth_methods(&self) -> &'static [AuthMethod];

    /// REST API version the provider speaks.
    fn api_version(&self) -> &'static str;

    /// Verify credentials, caching the authenticated session.
    ///
    /// # Errors
    ///
    /// `Authentication` for rejected credentials, `Connection` for network
    /// failures.
    async fn authenticate(&self) -> Result<bool>;

    /// Cheap reachability check; does not require valid credentials to
    /// return `false` gracefully.
    ///
    /// # Errors
    ///
    /// `Connection` when the endpoint is unreachable.
    async fn test_connection(&self) -> Result<bool>;

    /// All organizations visible to the credential.
    ///
    /// # Errors
    ///
    /// `Authentication` or `Api`.
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    /// Projects under an organization; empty for providers without a
    /// project level.
    ///
    /// # Errors
    ///
    /// `Permission` or `Api`.
    async fn list_projects(&self, org: &str) -> Result<Vec<Project>>;

    /// Lazy stream of repositories under an organization, optionally
    /// scoped to a project and narrowed by filters.
    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
        project: Option<&'a str>,
        filters: Option<&'a RepoFilters>,
    ) -> BoxStream<'a, Result<Repository>>;

    /// Fetch a single repository by name.
    ///
    /// # Errors
    ///
    /// `RepositoryNotFound`, `Permission`, or `Api`.
    async fn get_repository(
        &self,
        org: &str,
        repo: &str,
        project: Option<&str>,
    ) -> Result<Repository>;

    /// Build a clone URL with credentials embedded in the userinfo segment.
    ///
    /// # Errors
    ///
    /// `Configuration` when the instance has no usable credential.
    fn authenticated_clone_url(&self, repo: &Repository) -> Result<String>;

    /// Whether the provider has a project level between organization and
    /// repository.
    fn supports_projects(&self) -> bool;

    /// Most recent rate-limit snapshot, when the provider reports one.
    fn rate_limit_info(&self) -> Option<RateLimitInfo>;

    /// Release the underlying session. Instances must not be used after
    /// closing.
    async fn close(&self) {}
}

/// Per-request timeout applied to every provider HTTP call.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client a provider instance holds for its lifetime.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("repofleet/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RepoFleetError::connection(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest transport error onto the error taxonomy.
pub(crate) fn transport_error(provider: ProviderKind, err: &reqwest::Error) -> RepoFleetError {
    if err.is_timeout() || err.is_connect() {
        RepoFleetError::connection(format!("{provider}: {err}"))
    } else {
        RepoFleetError::provider(provider.as_str(), err.to_string())
    }
}
