//! BitBucket Cloud provider implementation.
//!
//! Speaks the REST API 2.0 with HTTP Basic app-password authentication.
//! Pagination follows the absolute `next` URL embedded in each response
//! page. Language and visibility filters are pushed down server-side via
//! the `q=` query parameter.

use crate::config::ProviderConfig;
use crate::error::{RepoFleetError, Result};
use crate::layout::embed_bitbucket_credentials;
use crate::providers::{build_http_client, transport_error, AuthMethod, Provider};
use crate::types::{
    Organization, Project, ProviderKind, RateLimitInfo, RepoFilters, Repository, Visibility,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::OnceCell;

const API_VERSION: &str = "2.0";
const PAGE_SIZE: u32 = 100;

/// BitBucket Cloud REST API provider.
pub struct BitBucketProvider {
    client: reqwest::Client,
    api_base_url: String,
    username: String,
    app_password: String,
    authenticated: OnceCell<()>,
    rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl BitBucketProvider {
    /// Declared provider tag.
    pub const PROVIDER_NAME: &'static str = "bitbucket";

    /// Build an instance from a named configuration.
    ///
    /// `https://bitbucket.org` is transparently coerced to the API base.
    ///
    /// # Errors
    ///
    /// `Connection` when the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            api_base_url: coerce_api_base(&config.url),
            username: config.user.clone(),
            app_password: config.token.clone(),
            authenticated: OnceCell::new(),
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
            .basic_auth(&self.username, Some(&self.app_password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(ProviderKind::BitBucket, &e))?;

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
            used: None,
        };
        if info.limit.is_some() || info.remaining.is_some() {
            if let Ok(mut guard) = self.rate_limit.lock() {
                *guard = Some(info);
            }
        }
    }

    async fn classify_error(&self, response: reqwest::Response) -> RepoFleetError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            401 => RepoFleetError::authentication(Self::PROVIDER_NAME, "app password rejected"),
            403 => RepoFleetError::Permission { message: truncate(&body) },
            // 429 stays a generic API error: BitBucket does not document a
            // reset header to carry.
            code => RepoFleetError::api(Self::PROVIDER_NAME, code, truncate(&body)),
        }
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        self.authenticated
            .get_or_try_init(|| async {
                let response = self.send(&format!("{}/user", self.api_base_url)).await?;
                if !response.status().is_success() {
                    return Err(self.classify_error(response).await);
                }
                tracing::debug!(user = %self.username, "BitBucket authentication succeeded");
                Ok(())
            })
            .await
            .copied()
    }

    /// First-page URL for a workspace repository listing, with server-side
    /// filters encoded into `q=`.
    fn repo_listing_url(
        &self,
        workspace: &str,
        project: Option<&str>,
        filters: Option<&RepoFilters>,
    ) -> String {
        let mut clauses: Vec<String> = Vec::new();
        if let Some(project) = project {
            clauses.push(format!("project.name=\"{project}\""));
        }
        if let Some(filters) = filters {
            if let Some(language) = &filters.language {
                clauses.push(format!("language=\"{language}\""));
            }
            match filters.visibility {
                Some(Visibility::Private) => clauses.push("is_private=true".to_string()),
                Some(Visibility::Public) => clauses.push("is_private=false".to_string()),
                _ => {}
            }
        }

        let mut url =
            format!("{}/repositories/{}?pagelen={}", self.api_base_url, workspace, PAGE_SIZE);
        if !clauses.is_empty() {
            let q: String = clauses.join(" AND ");
            url.push_str("&q=");
            url.push_str(&urlencode(&q));
        }
        url
    }

    async fn fetch_repo_page(&self, url: &str) -> Result<(Vec<Repository>, Option<String>)> {
        let response = self.send(url).await?;
        if !response.status().is_success() {
            return Err(self.classify_error(response).await);
        }
        let page: Paginated<BitBucketRepo> = response
            .json()
            .await
            .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
        let next = page.next;
        let repos = page.values.into_iter().map(BitBucketRepo::into_repository).collect();
        Ok((repos, next))
    }
}

#[async_trait]
impl Provider for BitBucketProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BitBucket
    }

    fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::AppPassword]
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
        self.ensure_authenticated().await?;

        let mut orgs = Vec::new();
        let mut url =
            Some(format!("{}/workspaces?pagelen={}", self.api_base_url, PAGE_SIZE));
        while let Some(current) = url.take() {
            let response = self.send(&current).await?;
            if !response.status().is_success() {
                return Err(self.classify_error(response).await);
            }
            let page: Paginated<BitBucketWorkspace> = response
                .json()
                .await
                .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
            orgs.extend(page.values.into_iter().map(|ws| Organization {
                url: format!("https://bitbucket.org/{}", ws.slug),
                name: ws.slug,
                provider: ProviderKind::BitBucket,
                metadata: Default::default(),
            }));
            url = page.next;
        }
        Ok(orgs)
    }

    async fn list_projects(&self, org: &str) -> Result<Vec<Project>> {
        self.ensure_authenticated().await?;

        let mut projects = Vec::new();
        let mut url = Some(format!(
            "{}/workspaces/{}/projects?pagelen={}",
            self.api_base_url, org, PAGE_SIZE
        ));
        while let Some(current) = url.take() {
            let response = self.send(&current).await?;
            if !response.status().is_success() {
                return Err(self.classify_error(response).await);
            }
            let page: Paginated<BitBucketProject> = response
                .json()
                .await
                .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
            projects.extend(page.values.into_iter().map(|p| {
                let mut project = Project {
                    name: p.name,
                    organization: org.to_string(),
                    description: p.description,
                    metadata: Default::default(),
                };
                project.metadata.insert("key".into(), p.key);
                project
            }));
            url = page.next;
        }
        Ok(projects)
    }

    fn list_repositories<'a>(
        &'a self,
        org: &'a str,
        project: Option<&'a str>,
        filters: Option<&'a RepoFilters>,
    ) -> BoxStream<'a, Result<Repository>> {
        struct PageState {
            buffer: VecDeque<Repository>,
            next: Option<String>,
            started: bool,
            done: bool,
        }

        let state = PageState { buffer: VecDeque::new(), next: None, started: false, done: false };

        Box::pin(futures::stream::try_unfold(state, move |mut state| async move {
            loop {
                if let Some(repo) = state.buffer.pop_front() {
                    // Language/visibility went into q=; the rest applies here.
                    if filters.is_none_or(|f| f.matches(&repo)) {
                        return Ok(Some((repo, state)));
                    }
                    continue;
                }
                if state.done {
                    return Ok(None);
                }

                let url = if state.started {
                    match state.next.take() {
                        Some(next) => next,
                        None => return Ok(None),
                    }
                } else {
                    self.ensure_authenticated().await?;
                    state.started = true;
                    self.repo_listing_url(org, project, filters)
                };

                let (page, next) = self.fetch_repo_page(&url).await?;
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
        let url = format!("{}/repositories/{}/{}", self.api_base_url, org, repo);
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
        let repo: BitBucketRepo = response
            .json()
            .await
            .map_err(|e| RepoFleetError::provider(Self::PROVIDER_NAME, e.to_string()))?;
        Ok(repo.into_repository())
    }

    fn authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        if self.username.is_empty() || self.app_password.is_empty() {
            return Err(RepoFleetError::configuration(
                "BitBucket provider needs both user and app password",
            ));
        }
        Ok(embed_bitbucket_credentials(&repo.clone_url, &self.username, &self.app_password))
    }

    fn supports_projects(&self) -> bool {
        true
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.rate_limit.lock().ok().and_then(|guard| *guard)
    }
}

fn coerce_api_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.is_empty()
        || (trimmed.contains("bitbucket.org") && !trimmed.contains("api.bitbucket.org"))
    {
        "https://api.bitbucket.org/2.0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Minimal percent-encoding for a `q=` query value.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 500;
    if body.len() > LIMIT {
        format!("{}...", &body[..LIMIT])
    } else {
        body.to_string()
    }
}

/// BitBucket paginated envelope: absolute `next` URL plus `values`.
#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitBucketWorkspace {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct BitBucketProject {
    key: String,
    name: String,
    description: Option<String>,
}

/// BitBucket repository API response structure.
#[derive(Debug, Deserialize)]
struct BitBucketRepo {
    uuid: Option<String>,
    name: String,
    #[serde(default)]
    is_private: bool,
    mainbranch: Option<BitBucketBranch>,
    language: Option<String>,
    description: Option<String>,
    created_on: Option<String>,
    updated_on: Option<String>,
    // Bytes, stored raw.
    size: Option<u64>,
    links: BitBucketLinks,
}

#[derive(Debug, Deserialize)]
struct BitBucketBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitBucketLinks {
    #[serde(default = "Vec::new", rename = "clone")]
    clone: Vec<BitBucketCloneLink>,
}

#[derive(Debug, Deserialize)]
struct BitBucketCloneLink {
    href: String,
    name: String,
}

impl BitBucketRepo {
    fn into_repository(self) -> Repository {
        let clone_url = self
            .links
            .clone
            .iter()
            .find(|link| link.name == "https")
            .map(|link| link.href.clone())
            .unwrap_or_default();
        let ssh_url = self
            .links
            .clone
            .iter()
            .find(|link| link.name == "ssh")
            .map(|link| link.href.clone());

        let mut repo = Repository::new(self.name, clone_url, ProviderKind::BitBucket);
        repo.ssh_url = ssh_url;
        repo.default_branch =
            self.mainbranch.map_or_else(|| "main".to_string(), |b| b.name);
        repo.is_private = self.is_private;
        repo.size = self.size;
        repo.description = self.description;
        repo.created_at = self.created_on;
        repo.updated_at = self.updated_on;
        if let Some(uuid) = self.uuid {
            repo.metadata.insert("uuid".into(), uuid);
        }
        if let Some(language) = self.language {
            repo.metadata.insert("language".into(), language);
        }
        repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> BitBucketProvider {
        let config = ProviderConfig {
            url: "https://bitbucket.org".into(),
            user: "someone".into(),
            token: "app-pass".into(),
            workspace: Some("acme".into()),
        };
        BitBucketProvider::from_config(&config).unwrap().with_api_base_url(&server.uri())
    }

    fn repo_json(name: &str) -> serde_json::Value {
        json!({
            "uuid": format!("{{{name}-uuid}}"),
            "name": name,
            "is_private": true,
            "mainbranch": { "name": "develop" },
            "language": "rust",
            "description": "a repo",
            "created_on": "2023-01-01T00:00:00Z",
            "updated_on": "2024-01-01T00:00:00Z",
            "size": 2048,
            "links": {
                "clone": [
                    { "name": "https", "href": format!("https://bitbucket.org/acme/{name}.git") },
                    { "name": "ssh", "href": format!("git@bitbucket.org:acme/{name}.git") }
                ]
            }
        })
    }

    async fn mount_user(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "username": "someone" })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_workspaces_paginate_by_next_url() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        let page2 = format!("{}/workspaces?pagelen=100&page=2", server.uri());
        Mock::given(method("GET"))
            .and(path("/workspaces"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{ "slug": "beta" }],
                "next": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/workspaces"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{ "slug": "acme" }],
                "next": page2
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let orgs = provider.list_organizations().await.unwrap();
        let names: Vec<&str> = orgs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["acme", "beta"]);
    }

    #[tokio::test]
    async fn test_repo_mapping_extracts_clone_links() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [repo_json("widget")],
                "next": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let repos: Vec<Repository> =
            provider.list_repositories("acme", None, None).try_collect().await.unwrap();

        assert_eq!(repos.len(), 1);
        let repo = &repos[0];
        assert_eq!(repo.clone_url, "https://bitbucket.org/acme/widget.git");
        assert_eq!(repo.ssh_url.as_deref(), Some("git@bitbucket.org:acme/widget.git"));
        assert_eq!(repo.default_branch, "develop");
        assert!(repo.is_private);
        assert_eq!(repo.size, Some(2048));
        assert_eq!(repo.metadata.get("language").map(String::as_str), Some("rust"));
    }

    #[tokio::test]
    async fn test_filters_pushed_into_query() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/acme"))
            .and(query_param("q", "language=\"rust\" AND is_private=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [repo_json("widget")],
                "next": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let filters = RepoFilters {
            language: Some("rust".into()),
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        let repos: Vec<Repository> = provider
            .list_repositories("acme", None, Some(&filters))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(repos.len(), 1);
    }

    #[tokio::test]
    async fn test_429_is_generic_api_error() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(method("GET"))
            .and(path("/repositories/acme"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result: Result<Vec<Repository>> =
            provider.list_repositories("acme", None, None).try_collect().await;
        match result.unwrap_err() {
            RepoFleetError::Api { status, .. } => assert_eq!(status, 429),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_projects() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(method("GET"))
            .and(path("/workspaces/acme/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{ "key": "PLAT", "name": "platform", "description": "infra" }],
                "next": null
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let projects = provider.list_projects("acme").await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "platform");
        assert_eq!(projects[0].metadata.get("key").map(String::as_str), Some("PLAT"));
    }

    #[test]
    fn test_authenticated_clone_url_encodes_credentials() {
        let config = ProviderConfig {
            url: "https://bitbucket.org".into(),
            user: "user@corp".into(),
            token: "p@ss".into(),
            workspace: None,
        };
        let provider = BitBucketProvider::from_config(&config).unwrap();
        let repo = Repository::new(
            "widget",
            "https://bitbucket.org/acme/widget.git",
            ProviderKind::BitBucket,
        );
        let url = provider.authenticated_clone_url(&repo).unwrap();
        assert!(url.contains("user%40corp"));
        assert!(!url.contains("user@corp:"));
        assert!(url.ends_with("@bitbucket.org/acme/widget.git"));
    }

    #[test]
    fn test_coerce_api_base() {
        assert_eq!(coerce_api_base("https://bitbucket.org"), "https://api.bitbucket.org/2.0");
        assert_eq!(
            coerce_api_base("https://api.bitbucket.org/2.0"),
            "https://api.bitbucket.org/2.0"
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("language=\"go\""), "language%3D%22go%22");
        assert_eq!(urlencode("a b"), "a%20b");
    }
}
