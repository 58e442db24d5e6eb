//! Repository status scanning.
//!
//! Walks a directory tree for git repositories, runs
//! `git status --porcelain=v1 -b` in each (optionally after a non-fatal
//! `git fetch`), and classifies working trees as clean or dirty. Parsing
//! failures and git errors are recorded per repository; the scan itself
//! always completes.

use crate::error::{RepoFleetError, Result};
use crate::executor::{BatchExecutor, CancelFlag};
use crate::git::GitRunner;
use crate::progress::ProgressSink;
use colored::Colorize;
use comfy_table::{presets, Cell, ContentArrangement, Table};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Status of one repository working tree.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStatus {
    /// Repository directory
    pub path: PathBuf,
    /// Working tree has no local changes and no divergence
    pub is_clean: bool,
    /// Current branch name (empty when the scan failed)
    pub branch: String,
    /// Upstream branch, when one is configured
    pub remote_branch: Option<String>,
    /// Commits ahead of upstream
    pub ahead: u32,
    /// Commits behind upstream
    pub behind: u32,
    /// Modified (unstaged) files
    pub modified: u32,
    /// Untracked files
    pub untracked: u32,
    /// Staged files
    pub staged: u32,
    /// Scan failure, when the repository could not be inspected
    pub error: Option<String>,
}

impl RepositoryStatus {
    fn failed(path: PathBuf, error: String) -> Self {
        Self {
            path,
            is_clean: false,
            branch: String::new(),
            remote_branch: None,
            ahead: 0,
            behind: 0,
            modified: 0,
            untracked: 0,
            staged: 0,
            error: Some(error),
        }
    }
}

/// Parallel status scanner.
pub struct StatusScanner {
    git: GitRunner,
    concurrency: usize,
    fetch: bool,
}

impl StatusScanner {
    /// Create a scanner.
    ///
    /// `fetch` runs `git fetch` before each status call so ahead/behind
    /// counts reflect the remote; fetch failures are non-fatal.
    #[must_use]
    pub fn new(concurrency: usize, fetch: bool) -> Self {
        Self { git: GitRunner::new(), concurrency, fetch }
    }

    /// Find candidate repositories: the root itself when it holds `.git`,
    /// plus every directory under it with a `.git` child.
    #[must_use]
    pub fn find_repositories(root: &Path) -> Vec<PathBuf> {
        let mut repos = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(std::result::Result::ok)
        {
            if entry.file_type().is_dir() && entry.path().join(".git").exists() {
                repos.push(entry.path().to_path_buf());
            }
        }
        repos.sort();
        repos
    }

    /// Scan everything under `root` and return statuses sorted by path.
    ///
    /// # Errors
    ///
    /// `Validation` when the root does not exist. Per-repository problems
    /// are recorded in the result, never raised.
    pub async fn scan(
        &self,
        root: &Path,
        cancel: &CancelFlag,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<RepositoryStatus>> {
        if !root.exists() {
            return Err(RepoFleetError::validation(format!(
                "status root does not exist: {}",
                root.display()
            )));
        }

        let repos = Self::find_repositories(root);
        tracing::info!(root = %root.display(), count = repos.len(), "scanning repositories");

        let overall = progress.add_task("Scanning status", Some(repos.len() as u64));
        let executor = BatchExecutor::new(self.concurrency);
        let report = executor
            .run(repos, cancel, |_, path| async move {
                let status = self.status_of(path.clone()).await;
                progress.advance(overall, 1);
                Ok::<RepositoryStatus, RepoFleetError>(status)
            })
            .await?;
        progress.finish(overall, "scan complete");

        let mut statuses: Vec<RepositoryStatus> =
            report.results.into_iter().flatten().collect();
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(statuses)
    }

    /// Inspect one repository; failures become a status record with the
    /// error field set.
    async fn status_of(&self, path: PathBuf) -> RepositoryStatus {
        match self.git.status_porcelain(&path, self.fetch).await {
            Ok(output) => match parse_porcelain(&output.stdout) {
                Ok(parsed) => RepositoryStatus {
                    is_clean: parsed.is_clean(),
                    branch: parsed.branch,
                    remote_branch: parsed.remote_branch,
                    ahead: parsed.ahead,
                    behind: parsed.behind,
                    modified: parsed.modified,
                    untracked: parsed.untracked,
                    staged: parsed.staged,
                    error: None,
                    path,
                },
                Err(e) => RepositoryStatus::failed(path, e.to_string()),
            },
            Err(e) => RepositoryStatus::failed(path, e.to_string()),
        }
    }
}

/// Parsed `git status --porcelain=v1 -b` output.
#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedStatus {
    branch: String,
    remote_branch: Option<String>,
    ahead: u32,
    behind: u32,
    modified: u32,
    untracked: u32,
    staged: u32,
}

impl ParsedStatus {
    fn is_clean(&self) -> bool {
        self.ahead + self.behind + self.modified + self.untracked + self.staged == 0
    }
}

/// Parse porcelain v1 branch-mode output.
///
/// The first line must be `## branch[...upstream][ [ahead N[, behind M]]]`.
/// Subsequent lines carry a two-column status code: `??` marks untracked
/// files, otherwise a non-space in column 0 means staged and a non-space in
/// column 1 means modified.
fn parse_porcelain(output: &str) -> Result<ParsedStatus> {
    let mut lines = output.lines();
    let header = lines
        .next()
        .ok_or_else(|| RepoFleetError::validation("empty status output"))?;
    let header = header
        .strip_prefix("## ")
        .ok_or_else(|| {
            RepoFleetError::validation(format!("malformed status header: {header}"))
        })?;

    // branch, optional ...upstream, optional bracketed divergence counts
    let re = Regex::new(r"^(?P<branch>.+?)(?:\.\.\.(?P<remote>\S+?))?(?: \[(?P<counts>[^\]]+)\])?$")
        .map_err(|e| RepoFleetError::validation(e.to_string()))?;
    let captures = re
        .captures(header)
        .ok_or_else(|| RepoFleetError::validation(format!("malformed status header: {header}")))?;

    let mut parsed = ParsedStatus {
        branch: captures.name("branch").map(|m| m.as_str().to_string()).unwrap_or_default(),
        remote_branch: captures.name("remote").map(|m| m.as_str().to_string()),
        ..Default::default()
    };

    if let Some(counts) = captures.name("counts") {
        for part in counts.as_str().split(", ") {
            if let Some(n) = part.strip_prefix("ahead ") {
                parsed.ahead = n.parse().unwrap_or(0);
            } else if let Some(n) = part.strip_prefix("behind ") {
                parsed.behind = n.parse().unwrap_or(0);
            }
        }
    }

    for line in lines {
        if line.len() < 2 {
            continue;
        }
        if line.starts_with("??") {
            parsed.untracked += 1;
            continue;
        }
        let mut chars = line.chars();
        let index_col = chars.next().unwrap_or(' ');
        let worktree_col = chars.next().unwrap_or(' ');
        if index_col != ' ' {
            parsed.staged += 1;
        }
        if worktree_col != ' ' {
            parsed.modified += 1;
        }
    }

    Ok(parsed)
}

/// Render statuses as a table. Clean repositories are hidden unless
/// `show_clean` is set.
#[must_use]
pub fn render_table(statuses: &[RepositoryStatus], show_clean: bool, use_colors: bool) -> String {
    let rows: Vec<&RepositoryStatus> =
        statuses.iter().filter(|s| show_clean || !s.is_clean).collect();

    let dirty = statuses.iter().filter(|s| !s.is_clean).count();
    let mut out = String::new();
    out.push_str(&format!(
        "{} repositories scanned, {} dirty\n",
        statuses.len(),
        if use_colors && dirty > 0 {
            dirty.to_string().red().bold().to_string()
        } else {
            dirty.to_string()
        }
    ));

    if rows.is_empty() {
        out.push_str("Working trees are clean.\n");
        return out;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Path", "Branch", "Upstream", "Ahead", "Behind", "Staged", "Modified", "Untracked",
            "State",
        ]);

    for status in rows {
        let state = if let Some(error) = &status.error {
            format!("error: {error}")
        } else if status.is_clean {
            "clean".to_string()
        } else {
            "dirty".to_string()
        };
        table.add_row(vec![
            Cell::new(status.path.display()),
            Cell::new(&status.branch),
            Cell::new(status.remote_branch.as_deref().unwrap_or("-")),
            Cell::new(status.ahead),
            Cell::new(status.behind),
            Cell::new(status.staged),
            Cell::new(status.modified),
            Cell::new(status.untracked),
            Cell::new(state),
        ]);
    }
    out.push_str(&table.to_string());
    out.push('\n');
    out
}

/// Render statuses as the JSON report array.
///
/// # Errors
///
/// Serialization errors surface as `Validation`.
pub fn render_json(statuses: &[RepositoryStatus]) -> Result<String> {
    Ok(serde_json::to_string_pretty(statuses)?)
}

/// Whether any repository is dirty, for the fail-on-dirty exit path.
#[must_use]
pub fn any_dirty(statuses: &[RepositoryStatus]) -> bool {
    statuses.iter().any(|s| !s.is_clean)
}
