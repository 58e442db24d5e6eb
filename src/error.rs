//! Error types for RepoFleet.
//!
//! This module defines the error hierarchy using `thiserror`. All errors
//! carry context and propagate with the `?` operator.
//!
//! # Error Categories
//!
//! - **Configuration errors**: missing fields, invalid provider URLs
//! - **Provider errors**: authentication, rate limits, API failures
//! - **Git errors**: non-zero exits from clone/pull/status subprocesses
//! - **Validation errors**: bad query syntax, disallowed characters
//! - **Filesystem errors**: target directory creation/removal failures
//!
//! # Example
//!
//! ```rust
//! use repofleet::error::{RepoFleetError, Result};
//!
//! fn require_token(token: &str) -> Result<()> {
//!     if token.is_empty() {
//!         return Err(RepoFleetError::Configuration {
//!             message: "provider token must not be empty".into(),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// A specialized Result type for RepoFleet operations.
pub type Result<T> = std::result::Result<T, RepoFleetError>;

/// The main error type for RepoFleet.
///
/// Covers every failure mode of discovery, bulk operations, and status
/// scanning. Each variant maps to a stable process exit code via
/// [`RepoFleetError::exit_code`].
#[derive(Error, Debug)]
pub enum RepoFleetError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Missing required field, invalid URL, or unknown provider type.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem
        message: String,
    },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Bad or expired credentials.
    #[error("Authentication failed for provider '{provider}': {message}")]
    Authentication {
        /// Provider tag the failure belongs to
        provider: String,
        /// Error message
        message: String,
    },

    /// Network failure or unreachable endpoint.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message
        message: String,
    },

    /// Provider-reported throttling.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimit {
        /// Provider tag
        provider: String,
        /// Epoch seconds at which the limit resets, when the provider says
        reset_at: Option<u64>,
    },

    /// 403-class response on an otherwise valid request.
    #[error("Permission denied: {message}")]
    Permission {
        /// Error message
        message: String,
    },

    /// Repository does not exist or is not visible.
    #[error("Repository not found: {org}/{name}")]
    RepositoryNotFound {
        /// Organization the lookup ran against
        org: String,
        /// Repository name
        name: String,
    },

    /// Organization does not exist or is not visible.
    #[error("Organization not found: {name}")]
    OrganizationNotFound {
        /// Organization name
        name: String,
    },

    /// Project does not exist within the organization.
    #[error("Project not found: {org}/{name}")]
    ProjectNotFound {
        /// Organization name
        org: String,
        /// Project name
        name: String,
    },

    /// No provider matches the requested name or URL.
    #[error("No provider found for '{input}'")]
    ProviderNotFound {
        /// The name or URL that failed to resolve
        input: String,
    },

    /// Provider-level failure that is none of the more specific kinds.
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider tag
        provider: String,
        /// Error message
        message: String,
    },

    /// Non-2xx API response with status attached.
    #[error("API error ({provider}): status {status}: {message}")]
    Api {
        /// Provider tag
        provider: String,
        /// HTTP status code
        status: u16,
        /// Error message or response excerpt
        message: String,
    },

    // =========================================================================
    // Git Errors
    // =========================================================================
    /// Non-zero exit from a git subprocess.
    #[error("git {operation} failed with exit code {exit_code}: {stderr}")]
    RepositoryOperation {
        /// The git operation that failed (clone, pull, status)
        operation: String,
        /// Exit code reported by git (-1 when killed by signal)
        exit_code: i32,
        /// The argv that was executed, credential-scrubbed
        argv: Vec<String>,
        /// Captured stdout, credential-scrubbed
        stdout: String,
        /// Captured stderr, credential-scrubbed
        stderr: String,
    },

    // =========================================================================
    // Input and Filesystem Errors
    // =========================================================================
    /// Bad query syntax, bad path, or disallowed characters.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
    },

    /// Cannot create or remove a target directory.
    #[error("Filesystem error at '{path}': {source}")]
    FileSystem {
        /// The path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Wrappers
    // =========================================================================
    /// All attempts of a caller-driven retry loop failed.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last error observed
        #[source]
        source: Box<RepoFleetError>,
    },
}

impl RepoFleetError {
    /// Creates a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an `Authentication` error.
    #[must_use]
    pub fn authentication(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication { provider: provider.into(), message: message.into() }
    }

    /// Creates a `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a `Provider` error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Creates an `Api` error.
    #[must_use]
    pub fn api(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Api { provider: provider.into(), status, message: message.into() }
    }

    /// Creates a `FileSystem` error.
    #[must_use]
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem { path: path.into(), source }
    }

    /// Whether batch processing should continue past this error.
    ///
    /// Per-repository and per-provider failures are recoverable; failures
    /// that mean the operation could never start are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration { .. } | Self::Validation { .. })
    }

    /// Returns the process exit code for the error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration { .. } => 1,
            Self::Authentication { .. } => 2,
            Self::Connection { .. } => 3,
            Self::RepositoryOperation { .. } => 4,
            Self::ProjectNotFound { .. } => 5,
            Self::OrganizationNotFound { .. } => 6,
            Self::Validation { .. } => 7,
            Self::FileSystem { .. } => 8,
            Self::Provider { .. } => 9,
            Self::RetryExhausted { .. } => 11,
            Self::RateLimit { .. } => 12,
            Self::ProviderNotFound { .. } => 13,
            Self::RepositoryNotFound { .. } => 14,
            Self::Permission { .. } => 15,
            Self::Api { .. } => 16,
        }
    }

    /// Short machine-readable tag for structured logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Authentication { .. } => "authentication",
            Self::Connection { .. } => "connection",
            Self::RateLimit { .. } => "rate_limit",
            Self::Permission { .. } => "permission",
            Self::RepositoryNotFound { .. } => "repository_not_found",
            Self::OrganizationNotFound { .. } => "organization_not_found",
            Self::ProjectNotFound { .. } => "project_not_found",
            Self::ProviderNotFound { .. } => "provider_not_found",
            Self::Provider { .. } => "provider",
            Self::Api { .. } => "api",
            Self::RepositoryOperation { .. } => "repository_operation",
            Self::Validation { .. } => "validation",
            Self::FileSystem { .. } => "filesystem",
            Self::RetryExhausted { .. } => "retry_exhausted",
        }
    }
}

impl From<std::io::Error> for RepoFleetError {
    fn from(source: std::io::Error) -> Self {
        // Used where no path is readily available; prefer
        // RepoFleetError::filesystem(path, source) when one is.
        Self::FileSystem { path: PathBuf::new(), source }
    }
}

impl From<serde_json::Error> for RepoFleetError {
    fn from(source: serde_json::Error) -> Self {
        Self::Validation {
            message: format!("JSON serialization/deserialization error: {source}"),
        }
    }
}

/// A structured error report suitable for logging sinks.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorReport {
    /// Machine-readable error kind
    pub error_type: String,
    /// Human-readable message, credential-masked
    pub message: String,
    /// RFC 3339 timestamp of when the report was composed
    pub timestamp: String,
    /// Free-form context (operation, repo, provider)
    pub context: String,
}

impl ErrorReport {
    /// Compose a report from an error and its surrounding context.
    ///
    /// The message is masked so tokens never reach a log sink.
    #[must_use]
    pub fn new(
        error: &RepoFleetError,
        context: &str,
        masker: &crate::security::CredentialMasker,
    ) -> Self {
        Self {
            error_type: error.kind().to_string(),
            message: masker.mask(&error.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            context: context.to_string(),
        }
    }
}
