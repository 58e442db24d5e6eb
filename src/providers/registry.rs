//! Provider registry: name dispatch and URL detection.
//!
//! The registry is constructed explicitly at startup and immutable
//! afterwards. It maps provider tags to constructors and detects the
//! provider responsible for a URL through an ordered regex list, falling
//! back to a hostname-substring heuristic.

use crate::config::{ConfigStore, ProviderConfig};
use crate::error::{RepoFleetError, Result};
use crate::providers::{AzureDevOpsProvider, BitBucketProvider, GitHubProvider, Provider};
use crate::types::ProviderKind;
use regex::Regex;

type Constructor = fn(&ProviderConfig) -> Result<Box<dyn Provider>>;

struct Registration {
    tag: &'static str,
    kind: ProviderKind,
    construct: Constructor,
}

/// Registry of provider constructors with URL-based detection.
pub struct Registry {
    entries: Vec<Registration>,
    // Ordered most-specific first; checked before the substring heuristic.
    url_patterns: Vec<(Regex, &'static str)>,
}

fn construct_azure(config: &ProviderConfig) -> Result<Box<dyn Provider>> {
    Ok(Box::new(AzureDevOpsProvider::from_config(config)?))
}

fn construct_github(config: &ProviderConfig) -> Result<Box<dyn Provider>> {
    Ok(Box::new(GitHubProvider::from_config(config)?))
}

fn construct_bitbucket(config: &ProviderConfig) -> Result<Box<dyn Provider>> {
    Ok(Box::new(BitBucketProvider::from_config(config)?))
}

impl Registry {
    /// Registry with the three built-in providers and the standard URL
    /// patterns (Azure DevOps, GitHub, BitBucket, plus a GitLab placeholder
    /// that resolves to provider-not-found).
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self { entries: Vec::new(), url_patterns: Vec::new() };
        registry.register(
            AzureDevOpsProvider::PROVIDER_NAME,
            ProviderKind::AzureDevOps,
            construct_azure,
        );
        registry.register(GitHubProvider::PROVIDER_NAME, ProviderKind::GitHub, construct_github);
        registry.register(
            BitBucketProvider::PROVIDER_NAME,
            ProviderKind::BitBucket,
            construct_bitbucket,
        );

        let patterns: [(&str, &str); 4] = [
            (r"(?i)(dev\.azure\.com|[\w-]+\.visualstudio\.com)", "azuredevops"),
            (r"(?i)github\.com", "github"),
            (r"(?i)bitbucket\.org", "bitbucket"),
            // Placeholder: detected but not constructible.
            (r"(?i)gitlab\.com", "gitlab"),
        ];
        for (pattern, tag) in patterns {
            if let Ok(re) = Regex::new(pattern) {
                registry.url_patterns.push((re, tag));
            }
        }
        registry
    }

    /// Register a provider constructor under a tag.
    ///
    /// A tag that differs from the provider's declared name is allowed as
    /// an alias but logged as a warning.
    pub fn register(&mut self, tag: &'static str, kind: ProviderKind, construct: Constructor) {
        if tag != kind.as_str() {
            tracing::warn!(
                tag = tag,
                declared = kind.as_str(),
                "provider registered under an alias"
            );
        }
        self.entries.push(Registration { tag, kind, construct });
    }

    /// All registered tags.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.tag).collect()
    }

    /// Detect the provider tag responsible for a URL.
    ///
    /// Ordered regex patterns are tried first, then a hostname-substring
    /// heuristic.
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` when nothing matches.
    pub fn detect_tag(&self, url: &str) -> Result<&'static str> {
        for (pattern, tag) in &self.url_patterns {
            if pattern.is_match(url) {
                return Ok(tag);
            }
        }

        let lowered = url.to_lowercase();
        for (needle, tag) in [
            ("github", "github"),
            ("azure", "azuredevops"),
            ("visualstudio", "azuredevops"),
            ("bitbucket", "bitbucket"),
            ("gitlab", "gitlab"),
        ] {
            if lowered.contains(needle) {
                return Ok(tag);
            }
        }

        Err(RepoFleetError::ProviderNotFound { input: url.to_string() })
    }

    /// Detect the provider kind for a URL.
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` for unknown URLs and for detected-but-unsupported
    /// hosts (the GitLab placeholder).
    pub fn detect_kind(&self, url: &str) -> Result<ProviderKind> {
        let tag = self.detect_tag(url)?;
        self.entries
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.kind)
            .ok_or_else(|| RepoFleetError::ProviderNotFound { input: url.to_string() })
    }

    /// Construct a provider of the given kind from a configuration.
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` for unregistered kinds; construction errors pass
    /// through.
    pub fn construct(&self, kind: ProviderKind, config: &ProviderConfig) -> Result<Box<dyn Provider>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.kind == kind)
            .ok_or_else(|| RepoFleetError::ProviderNotFound { input: kind.to_string() })?;
        (entry.construct)(config)
    }

    /// Detect the provider for a URL and construct it with the given
    /// configuration, filling in the URL when the config has none.
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` when detection fails; construction errors pass
    /// through.
    pub fn provider_by_url(&self, url: &str, config: &ProviderConfig) -> Result<Box<dyn Provider>> {
        let kind = self.detect_kind(url)?;
        let mut config = config.clone();
        if config.url.trim().is_empty() {
            config.url = url.to_string();
        }
        self.construct(kind, &config)
    }

    /// Construct the provider behind a named configuration entry.
    ///
    /// # Errors
    ///
    /// `ProviderNotFound` for unknown names, `Configuration` for URLs that
    /// resolve to no provider type.
    pub fn provider_from_config(
        &self,
        name: &str,
        store: &ConfigStore,
    ) -> Result<Box<dyn Provider>> {
        let config = store.provider(name)?;
        let kind = config.provider_kind()?;
        tracing::debug!(name = name, kind = %kind, "Constructing provider from configuration");
        self.construct(kind, config)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("https://dev.azure.com/org/proj/_git/repo", "azuredevops"; "ado modern")]
    #[test_case("https://myorg.visualstudio.com/proj/_git/repo", "azuredevops"; "ado legacy")]
    #[test_case("https://github.com/org/repo", "github"; "github")]
    #[test_case("git@github.com:org/repo.git", "github"; "github ssh")]
    #[test_case("https://bitbucket.org/ws/repo", "bitbucket"; "bitbucket")]
    #[test_case("https://gitlab.com/group/repo", "gitlab"; "gitlab placeholder")]
    fn test_detect_tag(url: &str, expected: &str) {
        let registry = Registry::with_builtin();
        assert_eq!(registry.detect_tag(url).unwrap(), expected);
    }

    #[test]
    fn test_heuristic_fallback() {
        let registry = Registry::with_builtin();
        // No regex hit, substring heuristic decides.
        assert_eq!(registry.detect_tag("https://github.example.internal/o/r").unwrap(), "github");
        assert_eq!(registry.detect_tag("https://my-bitbucket-mirror.corp/r").unwrap(), "bitbucket");
    }

    #[test]
    fn test_unknown_url_is_provider_not_found() {
        let registry = Registry::with_builtin();
        assert!(matches!(
            registry.detect_tag("https://example.com/org/repo"),
            Err(RepoFleetError::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn test_gitlab_is_detected_but_not_constructible() {
        let registry = Registry::with_builtin();
        assert_eq!(registry.detect_tag("https://gitlab.com/g/r").unwrap(), "gitlab");
        assert!(matches!(
            registry.detect_kind("https://gitlab.com/g/r"),
            Err(RepoFleetError::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn test_provider_by_url_fills_missing_url() {
        let registry = Registry::with_builtin();
        let config = ProviderConfig {
            url: String::new(),
            user: "u".into(),
            token: "t".into(),
            workspace: None,
        };
        let provider =
            registry.provider_by_url("https://github.com/org/repo", &config).unwrap();
        assert_eq!(provider.kind(), ProviderKind::GitHub);
    }

    #[test]
    fn test_provider_from_config() {
        let registry = Registry::with_builtin();
        let store = ConfigStore::from_yaml(
            r#"
providers:
  ado1:
    url: https://dev.azure.com/myorg
    user: ""
    token: pat
"#,
        )
        .unwrap();
        let provider = registry.provider_from_config("ado1", &store).unwrap();
        assert_eq!(provider.kind(), ProviderKind::AzureDevOps);
        assert!(provider.supports_projects());
        assert!(matches!(
            registry.provider_from_config("missing", &store),
            Err(RepoFleetError::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn test_tags() {
        let registry = Registry::with_builtin();
        assert_eq!(registry.tags(), vec!["azuredevops", "github", "bitbucket"]);
    }
}
