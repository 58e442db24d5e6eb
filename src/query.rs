//! Query parsing and pattern matching.
//!
//! Queries are up to three slash-separated glob segments,
//! `org/project/repo`, padded with `*` when fewer are given. Matching is
//! case-insensitive with `*` and `?` wildcards; a literal segment that does
//! not match exactly falls back to a prefix match (`myorg` matches
//! `myorg.visualstudio.com`).

use crate::error::{RepoFleetError, Result};
use glob::{MatchOptions, Pattern};

/// A parsed three-segment query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPattern {
    /// Organization pattern
    pub org: String,
    /// Project pattern
    pub project: String,
    /// Repository pattern
    pub repo: String,
}

/// Characters allowed in a query. Deliberately restrictive to head off
/// injection when queries are pasted into shell integrations.
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '*' | '?' | '/' | '_' | '.' | '-')
}

impl QueryPattern {
    /// Parse a raw query string.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error for empty input, more than three
    /// segments, empty segments, or disallowed characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RepoFleetError::validation("query must not be empty"));
        }
        if let Some(bad) = raw.chars().find(|c| !is_allowed_char(*c)) {
            return Err(RepoFleetError::validation(format!(
                "query contains disallowed character '{bad}'"
            )));
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() > 3 {
            return Err(RepoFleetError::validation(format!(
                "query has {} segments, at most 3 allowed (org/project/repo)",
                segments.len()
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RepoFleetError::validation("query segments must not be empty"));
        }

        let mut parts: Vec<String> = segments.iter().map(|s| (*s).to_string()).collect();
        while parts.len() < 3 {
            parts.push("*".to_string());
        }

        let repo = parts.pop().unwrap_or_else(|| "*".to_string());
        let project = parts.pop().unwrap_or_else(|| "*".to_string());
        let org = parts.pop().unwrap_or_else(|| "*".to_string());
        Ok(Self { org, project, repo })
    }

    /// First segment of the raw query, before padding. Used for the
    /// multi-provider dispatch decision.
    #[must_use]
    pub fn first_segment(raw: &str) -> &str {
        raw.trim().split('/').next().unwrap_or(raw)
    }
}

impl std::fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.project, self.repo)
    }
}

/// Whether the pattern contains glob wildcards.
#[must_use]
pub fn has_wildcards(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

const CASE_INSENSITIVE: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Case-insensitive glob match with prefix fallback.
///
/// Literal patterns (no `*`/`?`) that fail an exact case-insensitive
/// comparison are retried with a `*` appended, so `myorg` matches
/// `myorg.visualstudio.com`. The fallback never applies to wildcard
/// patterns.
#[must_use]
pub fn matches(pattern: &str, value: &str) -> bool {
    if has_wildcards(pattern) {
        return Pattern::new(pattern)
            .map(|p| p.matches_with(value, CASE_INSENSITIVE))
            .unwrap_or(false);
    }

    if pattern.eq_ignore_ascii_case(value) {
        return true;
    }

    Pattern::new(&format!("{pattern}*"))
        .map(|p| p.matches_with(value, CASE_INSENSITIVE))
        .unwrap_or(false)
}
