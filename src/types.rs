//! Core data model shared across providers, discovery, and bulk operations.
//!
//! Repository, organization, and project records are short-lived values:
//! discovery produces them, the bulk processor consumes them. No durable
//! state lives here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported hosting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure DevOps (dev.azure.com, *.visualstudio.com)
    AzureDevOps,
    /// GitHub (github.com)
    GitHub,
    /// BitBucket Cloud (bitbucket.org)
    BitBucket,
}

impl ProviderKind {
    /// Get the provider tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AzureDevOps => "azuredevops",
            Self::GitHub => "github",
            Self::BitBucket => "bitbucket",
        }
    }

    /// Parse a provider tag from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is not recognized.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "azuredevops" | "azure-devops" | "azure" | "ado" => Ok(Self::AzureDevOps),
            "github" => Ok(Self::GitHub),
            "bitbucket" => Ok(Self::BitBucket),
            _ => Err(format!("Unknown provider tag: {s}")),
        }
    }

    /// Recommended per-provider concurrency ceiling for bulk operations.
    #[must_use]
    pub fn concurrency_ceiling(&self) -> usize {
        match self {
            Self::GitHub => 10,
            Self::BitBucket => 5,
            Self::AzureDevOps => 4,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A repository record produced by discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name
    pub name: String,
    /// HTTPS clone URL; always non-empty
    pub clone_url: String,
    /// SSH clone URL, when the provider exposes one
    pub ssh_url: Option<String>,
    /// Default branch name
    pub default_branch: String,
    /// Whether the repository is private
    pub is_private: bool,
    /// Whether the repository is disabled (never cloned or pulled)
    pub is_disabled: bool,
    /// Raw size as reported by the provider; the unit is provider-defined
    pub size: Option<u64>,
    /// Free-form description
    pub description: Option<String>,
    /// ISO-8601 creation timestamp, when reported
    pub created_at: Option<String>,
    /// ISO-8601 last-update timestamp, when reported
    pub updated_at: Option<String>,
    /// Which provider produced this record
    pub provider: ProviderKind,
    /// Provider-specific fields the core never interprets
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Repository {
    /// Minimal constructor for a repository record; optional fields start
    /// empty and `default_branch` falls back to `main`.
    #[must_use]
    pub fn new(name: impl Into<String>, clone_url: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            name: name.into(),
            clone_url: clone_url.into(),
            ssh_url: None,
            default_branch: "main".to_string(),
            is_private: false,
            is_disabled: false,
            size: None,
            description: None,
            created_at: None,
            updated_at: None,
            provider,
            metadata: HashMap::new(),
        }
    }
}

/// A top-level namespace: Azure DevOps organization, GitHub org or user,
/// BitBucket workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Organization name (workspace slug for BitBucket)
    pub name: String,
    /// Web URL of the organization
    pub url: String,
    /// Which provider produced this record
    pub provider: ProviderKind,
    /// Provider-specific fields
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An optional middle namespace (Azure DevOps project, BitBucket project).
/// GitHub has none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project name
    pub name: String,
    /// Back-reference to the owning organization, by name
    pub organization: String,
    /// Free-form description
    pub description: Option<String>,
    /// Provider-specific fields
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Policy for repositories whose target directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UpdateMode {
    /// Leave existing directories untouched
    Skip,
    /// Run `git pull` in existing directories
    Pull,
    /// Remove pre-confirmed existing directories and re-clone
    Force,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Pull => write!(f, "pull"),
            Self::Force => write!(f, "force"),
        }
    }
}

/// Primary action of a bulk batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Clone repositories that do not exist locally
    Clone,
    /// Pull repositories that already exist locally
    Pull,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clone => write!(f, "clone"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Rate-limit snapshot captured from provider response headers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Request quota per window
    pub limit: Option<u64>,
    /// Requests remaining in the current window
    pub remaining: Option<u64>,
    /// Epoch seconds at which the window resets
    pub reset: Option<u64>,
    /// Requests used in the current window
    pub used: Option<u64>,
}

/// Repository visibility filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Public repositories only
    Public,
    /// Private repositories only
    Private,
    /// No visibility filtering
    All,
}

/// Uniform repository filters.
///
/// Providers push down what they can natively; the discovery engine applies
/// the rest client-side via [`RepoFilters::matches`].
#[derive(Debug, Clone, Default)]
pub struct RepoFilters {
    /// Include archived/disabled repositories (`Some(false)` excludes them)
    pub archived: Option<bool>,
    /// Primary language, matched case-insensitively
    pub language: Option<String>,
    /// Visibility filter
    pub visibility: Option<Visibility>,
    /// Regex applied to the repository name
    pub name_pattern: Option<String>,
    /// Only repositories updated at or after this ISO-8601 timestamp
    pub updated_after: Option<String>,
    /// Maximum size in kilobytes; repositories without a size always pass
    pub size_max_kb: Option<u64>,
}

impl RepoFilters {
    /// Whether any filter is set at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archived.is_none()
            && self.language.is_none()
            && self.visibility.is_none()
            && self.name_pattern.is_none()
            && self.updated_after.is_none()
            && self.size_max_kb.is_none()
    }

    /// Client-side filter application for criteria a provider could not
    /// push down. Unknown metadata simply passes.
    #[must_use]
    pub fn matches(&self, repo: &Repository) -> bool {
        if self.archived == Some(false) && repo.is_disabled {
            return false;
        }
        if let Some(visibility) = self.visibility {
            match visibility {
                Visibility::Public if repo.is_private => return false,
                Visibility::Private if !repo.is_private => return false,
                _ => {}
            }
        }
        if let Some(ref language) = self.language {
            match repo.metadata.get("language") {
                Some(actual) if actual.eq_ignore_ascii_case(language) => {}
                _ => return false,
            }
        }
        if let Some(ref pattern) = self.name_pattern {
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(&repo.name) => {}
                Ok(_) => return false,
                // An unparseable pattern was rejected earlier; pass here.
                Err(_) => {}
            }
        }
        if let Some(ref updated_after) = self.updated_after {
            // ISO-8601 timestamps compare correctly as strings.
            match repo.updated_at {
                Some(ref updated) if updated.as_str() >= updated_after.as_str() => {}
                Some(_) => return false,
                None => {}
            }
        }
        if let (Some(max_kb), Some(size)) = (self.size_max_kb, repo.size) {
            // Raw size units are provider-defined; the kilobyte cap is
            // applied to the raw value when no better information exists.
            if size > max_kb.saturating_mul(1024) {
                return false;
            }
        }
        true
    }
}

/// One row of the JSON repository listing.
#[derive(Debug, Clone, Serialize)]
pub struct RepoListing {
    /// Organization the repository was found under
    pub organization: String,
    /// Project the repository was found under, when the provider has them
    pub project: Option<String>,
    /// Repository name
    pub repository: String,
    /// HTTPS clone URL (unauthenticated)
    pub clone_url: String,
    /// SSH clone URL, when exposed
    pub ssh_url: Option<String>,
    /// Default branch
    pub default_branch: String,
    /// Whether the repository is private
    pub is_private: bool,
    /// Free-form description
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [ProviderKind::AzureDevOps, ProviderKind::GitHub, ProviderKind::BitBucket] {
            assert_eq!(ProviderKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(ProviderKind::parse("ADO").unwrap(), ProviderKind::AzureDevOps);
        assert!(ProviderKind::parse("gitlab").is_err());
    }

    #[test]
    fn test_repository_defaults() {
        let repo = Repository::new("svc-api", "https://github.com/o/svc-api.git", ProviderKind::GitHub);
        assert_eq!(repo.default_branch, "main");
        assert!(!repo.is_disabled);
        assert!(repo.ssh_url.is_none());
    }

    #[test]
    fn test_filters_visibility() {
        let mut repo = Repository::new("r", "https://github.com/o/r.git", ProviderKind::GitHub);
        repo.is_private = true;

        let filters = RepoFilters { visibility: Some(Visibility::Public), ..Default::default() };
        assert!(!filters.matches(&repo));

        let filters = RepoFilters { visibility: Some(Visibility::Private), ..Default::default() };
        assert!(filters.matches(&repo));

        let filters = RepoFilters { visibility: Some(Visibility::All), ..Default::default() };
        assert!(filters.matches(&repo));
    }

    #[test]
    fn test_filters_language_and_name() {
        let mut repo = Repository::new("svc-api", "https://github.com/o/svc-api.git", ProviderKind::GitHub);
        repo.metadata.insert("language".into(), "Rust".into());

        let filters = RepoFilters { language: Some("rust".into()), ..Default::default() };
        assert!(filters.matches(&repo));

        let filters = RepoFilters { language: Some("go".into()), ..Default::default() };
        assert!(!filters.matches(&repo));

        let filters = RepoFilters { name_pattern: Some("^svc-".into()), ..Default::default() };
        assert!(filters.matches(&repo));

        let filters = RepoFilters { name_pattern: Some("^web-".into()), ..Default::default() };
        assert!(!filters.matches(&repo));
    }

    #[test]
    fn test_filters_archived_and_empty() {
        let mut repo = Repository::new("r", "https://github.com/o/r.git", ProviderKind::GitHub);
        assert!(RepoFilters::default().is_empty());
        assert!(RepoFilters::default().matches(&repo));

        repo.is_disabled = true;
        let filters = RepoFilters { archived: Some(false), ..Default::default() };
        assert!(!filters.matches(&repo));
    }
}
