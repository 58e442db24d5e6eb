//! GitHub provider implementation.
//!
//! Speaks the REST v3 API with token authentication. Pagination follows
//! `Link: rel="next"` headers at page size 100; `X-RateLimit-*` headers are
//! captured after every response, and a 403 whose body mentions the rate
//! limit is classified as a rate-limit error carrying the reset time.

use crate::config::ProviderConfig;
use crate::error::{RepoFleetError, Result};
use crate::layout::embed_github_token;
use crate::providers::{build_http_client, transport_error, AuthMethod, Provider};
use crate::types::{Organization, Project, ProviderKind, RateLimitInfo, RepoFilters, Repository};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::OnceCell;

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: u32 = 100;

/// GitHub REST API provider.
pub struct GitHubProvider {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
    login: OnceCell<String>,
    rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl GitHubProvider {
    /// Declared provider tag.
    pub const PROVIDER_NAME: &'static str = "github";

    /// Build an instance from a named configuration.
    ///
    /// `https://github.com` is transparently coerced to the API base URL.
    ///
    /// # Errors
    ///
    /// `Connection` when the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            api_base_url: coerce_api_base(&config.url),
            token: config.token.clone(),
            login: OnceCell::new(),
            rate_limit: Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_api_base_url(mut self, api_base_url: &str) -> Self {
        self.api_base_url = api_base_url.trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| transport_error(ProviderKind::GitHub, &e))?;

        self.capture_rate_limit(response.headers());
        Ok(response)
    }

    fn capture_rate_limit(&self, headers: &HeaderMap) {
        let parse = |name: &str| {
            headers.get(name).and_then(|v| v.to_str().ok()).and_then(|s| s.parse::<u64>().ok())
        };
        let info = RateLimitInfo {
            limit: parse("x-ratelimit-limit"),
            remaining: parse("x-ratelimit-remaining"),
            reset: parse("x-ratelimit-reset"),
            used: parse("x-ratelimit-used"),
        };
        if info.limit.is_some() || info.remaining.is_some() {
            if let Ok(mut guard) = self.rate_limit.lock() {
                *guard = Some(info);
            }
        }
    }

    /// Classify a non-2xx response, consuming it for its body.
    async fn classify_error(&self, response: reqwest::Response) -> RepoFleetError {
        let status = response.status();
        let reset = self.rate_limit_info().and_then(|info| info.reset);
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => RepoFleetError::authentication(Self::PROVIDER_NAME, "token rejected"),
            403 => {
                let message = serde_json::from_str::<ApiMessage>(&body)
                    .map(|m| m.message)
                    .unwrap_or_default();
                if message.to_lowercase().contains("rate limit") {
                    RepoFleetError::RateLimit {
                        provider: Self::PROVIDER_NAME.to_string(),
                        reset_at: reset,
                    }
                } else {
                    RepoFleetError::Permission { message }
                }
            }
            code => RepoFleetError::api(Self::PROVIDER_NAME, code, truncate(&body)),
        }
    }

    async fn ensure_authenticated(&self) -> Result<&str> {
        self.login
            .get_or_try_init(|| async {
                let response = self.send(&format!("{}/user", self.api_base_url)).await?;
                if !response.status().is_success() {
                    return Err(self.classify_error(response).await);
                }
                let user: GitHubUser = response
                    .json()
                    .await
                    .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
                tracing::debug!(login = %user.login, "GitHub authentication succeeded");
                Ok(user.login)
            })
            .await
            .map(String::as_str)
    }

    /// Fetch one page of repositories; returns the mapped page and the next
    /// page URL from the Link header.
    async fn fetch_repo_page(
        &self,
        org: &str,
        url: Option<String>,
        tried_users_fallback: &mut bool,
    ) -> Result<(Vec<Repository>, Option<String>)> {
        let url = url.unwrap_or_else(|| {
            format!("{}/orgs/{}/repos?per_page={}", self.api_base_url, org, PAGE_SIZE)
        });

        let response = self.send(&url).await?;
        if response.status().as_u16() == 404 && !*tried_users_fallback {
            // Not an org: retry the user listing once.
            *tried_users_fallback = true;
            let fallback =
                format!("{}/users/{}/repos?per_page={}", self.api_base_url, org, PAGE_SIZE);
            tracing::debug!(org = %org, "org listing returned 404, falling back to user repos");
            let response = self.send(&fallback).await?;
            if !response.status().is_success() {
                return Err(self.classify_error(response).await);
            }
            return self.map_repo_page(response).await;
        }
        if !response.status().is_success() {
            return Err(self.classify_error(response).await);
        }
        self.map_repo_page(response).await
    }

    async fn map_repo_page(
        &self,
        response: reqwest::Response,
    ) -> Result<(Vec<Repository>, Option<String>)> {
        let next = next_link(response.headers());
        let page: Vec<GitHubRepo> = response
            .json()
            .await
            .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
        let repos = page.into_iter().map(GitHubRepo::into_repository).collect();
        Ok((repos, next))
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::Pat]
    }

    fn api_version(&self) -> &'static str {
        API_VERSION
    }

    async fn authenticate(&self) -> Result<bool> {
        self.ensure_authenticated().await?;
        Ok(true)
    }

    async fn test_connection(&self) -> Result<bool> {
        let response = self.send(&format!("{}/user", self.api_base_url)).await?;
        Ok(response.status().is_success())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let login = self.ensure_authenticated().await?.to_string();

        let mut orgs = Vec::new();
        let mut url = Some(format!("{}/user/orgs?per_page={}", self.api_base_url, PAGE_SIZE));
        while let Some(current) = url.take() {
            let response = self.send(&current).await?;
            if !response.status().is_success() {
                return Err(self.classify_error(response).await);
            }
            url = next_link(response.headers());
            let page: Vec<GitHubOrg> = response
                .json()
                .await
                .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
            if page.is_empty() {
                break;
            }
            orgs.extend(page.into_iter().map(|o| Organization {
                url: format!("https://github.com/{}", o.login),
                name: o.login,
                provider: ProviderKind::GitHub,
                metadata: Default::default(),
            }));
        }

        // The authenticated user doubles as a pseudo-organization so a
        // personal namespace is queryable with the same grammar.
        orgs.push(Organization {
            url: format!("https://github.com/{login}"),
            name: login,
            provider: ProviderKind::GitHub,
            metadata: Default::default(),
        });
        Ok(orgs)
    }

    async fn list_projects(&self, _org: &str) -> Result<Vec<Project>> {
        // GitHub has no project level between org and repository.
        Ok(Vec::new())
    }

    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
        _project: Option<&'a str>,
        filters: Option<&'a RepoFilters>,
    ) -> BoxStream<'a, Result<Repository>> {
        struct PageState {
            buffer: VecDeque<Repository>,
            next: Option<String>,
            started: bool,
            done: bool,
            tried_users_fallback: bool,
        }

        let state = PageState {
            buffer: VecDeque::new(),
            next: None,
            started: false,
            done: false,
            tried_users_fallback: false,
        };

        Box::pin(futures::stream::try_unfold(state, move |mut state| async move {
            loop {
                if let Some(repo) = state.buffer.pop_front() {
                    if filters.is_none_or(|f| f.matches(&repo)) {
                        return Ok(Some((repo, state)));
                    }
                    continue;
                }
                if state.done {
                    return Ok(None);
                }

                if !state.started {
                    self.ensure_authenticated().await?;
                    state.started = true;
                }

                let (page, next) = self
                    .fetch_repo_page(org, state.next.take(), &mut state.tried_users_fallback)
                    .await?;
                // An empty page terminates pagination even with a next link.
                state.done = next.is_none() || page.is_empty();
                state.next = next;
                if page.is_empty() {
                    return Ok(None);
                }
                state.buffer.extend(page);
            }
        }))
    }

    async fn get_repository(
        &self,
        org: &str,
        repo: &str,
        _project: Option<&str>,
    ) -> Result<Repository> {
        self.ensure_authenticated().await?;
        let url = format!("{}/repos/{}/{}", self.api_base_url, org, repo);
        let response = self.send(&url).await?;
        if response.status().as_u16() == 404 {
            return Err(RepoFleetError::RepositoryNotFound {
                org: org.to_string(),
                name: repo.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(self.classify_error(response).await);
        }
        let repo: GitHubRepo = response
            .json()
            .await
            .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
        Ok(repo.into_repository())
    }

    fn authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        if self.token.is_empty() {
            return Err(RepoFleetError::configuration("GitHub provider has no token configured"));
        }
        Ok(embed_github_token(&repo.clone_url, &self.token))
    }

    fn supports_projects(&self) -> bool {
        false
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }
}

fn coerce_api_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.is_empty() || (trimmed.contains("github.com") && !trimmed.contains("api.github.com"))
    {
        "https://api.github.com".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extract the `rel="next"` target from a Link header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    for part in value.split(',') {
        if part.contains("rel=\"next\"") {
            let url = part.split(';').next()?.trim();
            return Some(url.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 500;
    if body.len() > LIMIT {
        format!("{}...", &body[..LIMIT])
    } else {
        body.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubOrg {
    login: String,
}

/// GitHub repository API response structure.
#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    clone_url: String,
    ssh_url: Option<String>,
    default_branch: Option<String>,
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
    // GitHub reports size in kilobytes; the raw value is stored unchanged.
    size: Option<u64>,
    description: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    language: Option<String>,
    #[serde(default)]
    fork: bool,
}

impl GitHubRepo {
    fn into_repository(self) -> Repository {
        let mut repo = Repository::new(self.name, self.clone_url, ProviderKind::GitHub);
        repo.ssh_url = self.ssh_url;
        repo.default_branch = self.default_branch.unwrap_or_else(|| "main".to_string());
        repo.is_private = self.private;
        repo.is_disabled = self.archived || self.disabled;
        repo.size = self.size;
        repo.description = self.description;
        repo.created_at = self.created_at;
        repo.updated_at = self.updated_at;
        if let Some(language) = self.language {
            repo.metadata.insert("language".into(), language);
        }
        repo.metadata.insert("fork".into(), self.fork.to_string());
        repo
    }
}
