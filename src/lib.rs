//! # RepoFleet
//!
//! A multi-provider bulk Git repository manager.
//!
//! RepoFleet discovers repositories across Azure DevOps, GitHub, and
//! BitBucket Cloud with a single `org/project/repo` glob query, clones and
//! pulls them in bounded concurrent batches into a deterministic
//! `host/org/project/repo` layout, and reports working-tree status across
//! directory trees.
//!
//! ## Features
//!
//! - **Uniform provider contract**: one capability set over three REST
//!   APIs, with URL-based dispatch and per-operation provider lifecycles
//! - **Query language**: three-segment case-insensitive globs with
//!   multi-provider fan-out when the first segment is a wildcard
//! - **Lazy discovery**: repositories stream with backpressure; a result
//!   limit stops remote pagination early
//! - **Bulk operations**: bounded-concurrency clone/pull with update-mode
//!   policies and partial-failure collection
//! - **Status scanning**: parallel porcelain parsing with table and JSON
//!   reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use repofleet::{ConfigStore, DiscoveryEngine, NoopSink, Registry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigStore::load(None)?;
//!     let registry = Registry::with_builtin();
//!     let engine = DiscoveryEngine::new(&registry, &config);
//!
//!     let repos = engine.discover("octo-org/*/*", None, None, None, &NoopSink).await?;
//!     for found in &repos {
//!         println!("{}/{}", found.organization, found.repository.name);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod bulk;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod git;
pub mod layout;
pub mod progress;
pub mod providers;
pub mod query;
pub mod security;
pub mod status;
pub mod types;

// Re-export commonly used types at crate root
pub use bulk::{BulkOptions, BulkOutcome, BulkProcessor, ItemOutcome};
pub use config::{ConfigStore, ProviderConfig};
pub use discovery::{DiscoveredRepo, DiscoveryEngine};
pub use error::{RepoFleetError, Result};
pub use executor::{BatchExecutor, CancelFlag};
pub use progress::{IndicatifSink, NoopSink, ProgressSink};
pub use providers::{Provider, Registry};
pub use query::QueryPattern;
pub use security::CredentialMasker;
pub use status::{RepositoryStatus, StatusScanner};
pub use types::{
    OperationType, Organization, Project, ProviderKind, RateLimitInfo, RepoFilters, Repository,
    UpdateMode,
};
