//! Configuration module for RepoFleet.
//!
//! Configuration is read from YAML with environment-variable expansion:
//!
//! ```yaml
//! # repofleet.yaml
//!
//! default_provider: gh1
//!
//! providers:
//!   gh1:
//!     url: https://github.com
//!     user: octocat
//!     token: ${GITHUB_TOKEN}
//!   ado1:
//!     url: https://dev.azure.com/myorg
//!     user: ""
//!     token: ${AZURE_DEVOPS_PAT}
//!   bb1:
//!     url: https://bitbucket.org
//!     user: someone
//!     token: ${BITBUCKET_APP_PASSWORD}
//!     workspace: myworkspace
//!
//! settings:
//!   concurrency: 4
//! ```
//!
//! The provider type is never written down; it is inferred from the URL
//! (`dev.azure.com`/`visualstudio.com`, `github.com`, `bitbucket.org`).
//! The core only ever reads configuration; editing it belongs to the user.

use crate::error::{RepoFleetError, Result};
use crate::types::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single named provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider (organization URL for Azure DevOps)
    pub url: String,

    /// Username; empty for Azure DevOps PAT auth
    #[serde(default)]
    pub user: String,

    /// PAT or app password; treated as an opaque secret, never logged raw
    pub token: String,

    /// BitBucket workspace slug, when one is pinned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

impl ProviderConfig {
    /// Infer the provider kind from the configured URL.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error for URLs that match no known host.
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        let url = self.url.to_lowercase();
        if url.contains("dev.azure.com") || url.contains("visualstudio.com") {
            Ok(ProviderKind::AzureDevOps)
        } else if url.contains("github.com") {
            Ok(ProviderKind::GitHub)
        } else if url.contains("bitbucket.org") {
            Ok(ProviderKind::BitBucket)
        } else {
            Err(RepoFleetError::configuration(format!(
                "cannot infer provider type from URL '{}'",
                self.url
            )))
        }
    }
}

/// Global settings shared by all operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default per-batch concurrency
    pub concurrency: usize,

    /// Anything else, kept opaque for callers of `global_setting`
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self { concurrency: crate::executor::DEFAULT_CONCURRENCY, extra: BTreeMap::new() }
    }
}

/// The read-side configuration store the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigStore {
    /// Name of the provider used when a query names none
    pub default_provider: Option<String>,

    /// Named provider configurations
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Global settings
    pub settings: Settings,
}

impl ConfigStore {
    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the YAML is invalid.
    pub fn from_yaml(content: &str) -> Result<Self> {
        tracing::debug!("Parsing configuration from YAML");
        let expanded = expand_env_vars(content);

        let store: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| RepoFleetError::configuration(e.to_string()))?;

        tracing::debug!(
            providers = store.providers.len(),
            default_provider = ?store.default_provider,
            "Configuration loaded"
        );
        Ok(store)
    }

    /// Load configuration from the usual locations.
    ///
    /// Order: explicit path, `repofleet.yaml` / `.repofleet.yaml` in the
    /// working directory, `<config dir>/repofleet/config.yaml`, else an
    /// empty store.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when an explicit path cannot be read
    /// or any found file fails to parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!(path = %path.display(), "Loading configuration from explicit path");
            let content = std::fs::read_to_string(path).map_err(|e| {
                RepoFleetError::configuration(format!("cannot read '{}': {e}", path.display()))
            })?;
            return Self::from_yaml(&content);
        }

        let mut candidates: Vec<PathBuf> =
            vec![PathBuf::from("repofleet.yaml"), PathBuf::from(".repofleet.yaml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("repofleet").join("config.yaml"));
        }

        for path in candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Found configuration file");
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    RepoFleetError::configuration(format!("cannot read '{}': {e}", path.display()))
                })?;
                return Self::from_yaml(&content);
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// All configured provider names, sorted.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Look up a provider configuration by name.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotFound` for unknown names.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| RepoFleetError::ProviderNotFound { input: name.to_string() })
    }

    /// Name of the default provider, when one is configured.
    #[must_use]
    pub fn default_provider_name(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Fetch an opaque global setting by key.
    #[must_use]
    pub fn global_setting(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.settings.extra.get(key)
    }

    /// Infer the provider kind of a named configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotFound` for unknown names and `Configuration` for
    /// URLs that match no known provider.
    pub fn detect_provider_kind(&self, name: &str) -> Result<ProviderKind> {
        self.provider(name)?.provider_kind()
    }

    /// Validate every provider entry: required fields present and the URL
    /// resolvable to a provider type.
    ///
    /// # Errors
    ///
    /// Returns the first `Configuration` problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if provider.url.trim().is_empty() {
                return Err(RepoFleetError::configuration(format!(
                    "provider '{name}' has an empty url"
                )));
            }
            if provider.token.trim().is_empty() {
                return Err(RepoFleetError::configuration(format!(
                    "provider '{name}' has an empty token"
                )));
            }
            provider.provider_kind().map_err(|_| {
                RepoFleetError::configuration(format!(
                    "provider '{name}' has an unrecognized URL '{}'",
                    provider.url
                ))
            })?;
        }
        if let Some(default) = &self.default_provider {
            if !self.providers.contains_key(default) {
                return Err(RepoFleetError::configuration(format!(
                    "default_provider '{default}' is not a configured provider"
                )));
            }
        }
        Ok(())
    }

    /// Generate an example YAML configuration.
    #[must_use]
    pub fn example_yaml() -> String {
        r#"# RepoFleet configuration file

# Provider used when a command names none
default_provider: gh1

providers:
  # GitHub: personal access token
  gh1:
    url: https://github.com
    user: your-username
    token: ${GITHUB_TOKEN}

  # Azure DevOps: organization URL, org-scoped PAT, empty user
  # ado1:
  #   url: https://dev.azure.com/your-org
  #   user: ""
  #   token: ${AZURE_DEVOPS_PAT}

  # BitBucket Cloud: app password
  # bb1:
  #   url: https://bitbucket.org
  #   user: your-username
  #   token: ${BITBUCKET_APP_PASSWORD}
  #   workspace: your-workspace

settings:
  # In-flight limit for bulk clone/pull batches
  concurrency: 4
"#
        .to_string()
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax. Unset variables are left as-is.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    let re = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
