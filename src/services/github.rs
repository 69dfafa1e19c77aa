use crate::models::github::{Branch, Commit, Issue, PullRequest, RepoRef, Repository};
use crate::models::report::TimeWindow;
use crate::services::cache::{CacheKind, ResponseCache};
use anyhow::Result;
use chrono::Utc;
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeouts, connection failures, 5xx. Retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),
    /// Quota exhausted; wait until `reset` (epoch seconds). Not a failure
    /// and never counted against the retry budget.
    #[error("rate limited until epoch {reset}")]
    RateLimited { reset: i64 },
    /// 404. Aborts the specific fetch without retrying.
    #[error("resource not found")]
    NotFound,
    /// 401. Aborts the specific fetch without retrying.
    #[error("authentication failed")]
    Unauthorized,
    #[error("unexpected response: {0}")]
    Malformed(String),
}

pub struct Page<T> {
    pub items: Vec<T>,
    /// A full page means more pages may exist; the first short page ends
    /// the walk.
    pub has_more: bool,
}

pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<ResponseCache>,
    max_attempts: u32,
    backoff_base: Duration,
    rate_limit_buffer: Duration,
}

impl GitHubClient {
    pub fn new(token: Option<String>, cache: Arc<ResponseCache>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("repo-pulse"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(t) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", t))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
            cache,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            rate_limit_buffer: Duration::from_secs(2),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_tuning(
        mut self,
        max_attempts: u32,
        backoff_base: Duration,
        rate_limit_buffer: Duration,
    ) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base = backoff_base;
        self.rate_limit_buffer = rate_limit_buffer;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| FetchError::Malformed(e.to_string()));
        }

        match status {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                let remaining = header_num(response.headers(), "x-ratelimit-remaining");
                if remaining == Some(0) {
                    let reset = header_num(response.headers(), "x-ratelimit-reset")
                        .unwrap_or_else(|| Utc::now().timestamp() + 60);
                    Err(FetchError::RateLimited { reset })
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(FetchError::Malformed(format!("HTTP {}: {}", status, body)))
                }
            }
            s if s.is_server_error() => Err(FetchError::Transient(format!("HTTP {}", s))),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::Malformed(format!("HTTP {}: {}", s, body)))
            }
        }
    }

    /// Fetches a URL with bounded retries. Transient errors back off
    /// 2^attempt seconds; a rate-limit signal suspends until the reset time
    /// plus a small buffer without consuming an attempt; permanent errors
    /// abort immediately.
    pub async fn fetch_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.get_json::<T>(url).await {
                Ok(value) => return Ok(value),
                Err(FetchError::RateLimited { reset }) => {
                    let wait = (reset - Utc::now().timestamp()).max(0) as u64;
                    warn!("rate limit exhausted, waiting {}s until reset", wait);
                    tokio::time::sleep(Duration::from_secs(wait) + self.rate_limit_buffer).await;
                }
                Err(e @ FetchError::NotFound)
                | Err(e @ FetchError::Unauthorized)
                | Err(e @ FetchError::Malformed(_)) => return Err(e),
                Err(FetchError::Transient(msg)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(FetchError::Transient(msg));
                    }
                    let delay = self.backoff_base * 2u32.pow(attempt);
                    debug!("transient error ({}), retry {} in {:?}", msg, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One page of a list endpoint, cache-backed. `path_and_query` is
    /// relative to the API root and already carries per_page/page params.
    pub async fn fetch_page<T: DeserializeOwned + serde::Serialize>(
        &self,
        kind: CacheKind,
        cache_key: &str,
        path_and_query: &str,
        per_page: u32,
    ) -> Result<Page<T>, FetchError> {
        if let Some(items) = self.cache.get::<Vec<T>>(kind, cache_key).await {
            let has_more = items.len() as u32 == per_page;
            return Ok(Page { items, has_more });
        }

        let url = format!("{}{}", self.base_url, path_and_query);
        let items: Vec<T> = self.fetch_with_retry(&url).await?;
        self.cache.set(kind, cache_key, &items).await;

        let has_more = items.len() as u32 == per_page;
        Ok(Page { items, has_more })
    }

    pub async fn get_repository(&self, repo: &RepoRef) -> Option<Repository> {
        let url = format!("{}/repos/{}/{}", self.base_url, repo.owner, repo.name);
        match self.fetch_with_retry::<Repository>(&url).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("failed to fetch repository {}: {}", repo.key(), e);
                None
            }
        }
    }

    /// Branch enumeration surfaces failure so the collector can fall back
    /// to the default branch.
    pub async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<Branch>, FetchError> {
        let cache_key = repo.key();
        if let Some(branches) = self.cache.get::<Vec<Branch>>(CacheKind::Branches, &cache_key).await
        {
            return Ok(branches);
        }

        let mut branches: Vec<Branch> = Vec::new();
        for page in 1..=10u32 {
            let url = format!(
                "{}/repos/{}/{}/branches?per_page=100&page={}",
                self.base_url, repo.owner, repo.name, page
            );
            let chunk: Vec<Branch> = self.fetch_with_retry(&url).await?;
            let short = chunk.len() < 100;
            branches.extend(chunk);
            if short {
                break;
            }
        }
        self.cache.set(CacheKind::Branches, &cache_key, &branches).await;
        Ok(branches)
    }

    /// One page of commits for a branch, restricted to the window.
    /// Degrades to an empty page: a branch that disappears mid-run or a
    /// fetch that exhausts retries yields no commits, not a pipeline error.
    pub async fn list_commits_page(
        &self,
        repo: &RepoRef,
        branch: &str,
        window: &TimeWindow,
        page: u32,
        per_page: u32,
    ) -> Page<Commit> {
        let path = format!(
            "/repos/{}/{}/commits?sha={}&since={}&until={}&per_page={}&page={}",
            repo.owner,
            repo.name,
            branch,
            window.start.to_rfc3339(),
            window.end.to_rfc3339(),
            per_page,
            page
        );
        // per_page is part of the key so the 1-item probe never shadows a
        // full page.
        let cache_key = format!(
            "{}@{}:p{}x{}:{}..{}",
            repo.key(),
            branch,
            page,
            per_page,
            window.start.timestamp(),
            window.end.timestamp()
        );
        match self
            .fetch_page::<Commit>(CacheKind::Commits, &cache_key, &path, per_page)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "commits fetch failed for {}@{} page {}: {}",
                    repo.key(),
                    branch,
                    page,
                    e
                );
                Page {
                    items: Vec::new(),
                    has_more: false,
                }
            }
        }
    }

    /// Pull requests created within the window, newest first. Walks pages
    /// until one reaches past the window start or the ceiling is hit.
    pub async fn list_pulls(
        &self,
        repo: &RepoRef,
        window: &TimeWindow,
        per_page: u32,
        max_pages: u32,
    ) -> Vec<PullRequest> {
        let mut pulls = Vec::new();
        for page in 1..=max_pages {
            let path = format!(
                "/repos/{}/{}/pulls?state=all&sort=created&direction=desc&per_page={}&page={}",
                repo.owner, repo.name, per_page, page
            );
            let cache_key = format!(
                "{}:p{}:{}..{}",
                repo.key(),
                page,
                window.start.timestamp(),
                window.end.timestamp()
            );
            let result = self
                .fetch_page::<PullRequest>(CacheKind::PullRequests, &cache_key, &path, per_page)
                .await;
            let chunk = match result {
                Ok(p) => p,
                Err(e) => {
                    warn!("pulls fetch failed for {} page {}: {}", repo.key(), page, e);
                    break;
                }
            };
            let crossed_window = chunk.items.iter().any(|p| p.created_at < window.start);
            let has_more = chunk.has_more;
            pulls.extend(
                chunk
                    .items
                    .into_iter()
                    .filter(|p| window.contains(p.created_at)),
            );
            if crossed_window || !has_more {
                break;
            }
        }
        pulls
    }

    /// Issues created within the window. PR-conflated items are kept here
    /// and excluded by the aggregator.
    pub async fn list_issues(
        &self,
        repo: &RepoRef,
        window: &TimeWindow,
        per_page: u32,
        max_pages: u32,
    ) -> Vec<Issue> {
        let mut issues = Vec::new();
        for page in 1..=max_pages {
            let path = format!(
                "/repos/{}/{}/issues?state=all&since={}&per_page={}&page={}",
                repo.owner,
                repo.name,
                window.start.to_rfc3339(),
                per_page,
                page
            );
            let cache_key = format!(
                "{}:p{}:{}..{}",
                repo.key(),
                page,
                window.start.timestamp(),
                window.end.timestamp()
            );
            let result = self
                .fetch_page::<Issue>(CacheKind::Issues, &cache_key, &path, per_page)
                .await;
            let chunk = match result {
                Ok(p) => p,
                Err(e) => {
                    warn!("issues fetch failed for {} page {}: {}", repo.key(), page, e);
                    break;
                }
            };
            let has_more = chunk.has_more;
            issues.extend(
                chunk
                    .items
                    .into_iter()
                    .filter(|i| window.contains(i.created_at)),
            );
            if !has_more {
                break;
            }
        }
        issues
    }

    /// Per-commit detail (file list, line stats). Used for the bounded
    /// detail sample only; degrades to None.
    pub async fn get_commit_detail(&self, repo: &RepoRef, sha: &str) -> Option<Commit> {
        let cache_key = format!("{}@{}", repo.key(), sha);
        if let Some(commit) = self.cache.get::<Commit>(CacheKind::CommitDetail, &cache_key).await {
            return Some(commit);
        }

        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.base_url, repo.owner, repo.name, sha
        );
        match self.fetch_with_retry::<Commit>(&url).await {
            Ok(commit) => {
                self.cache.set(CacheKind::CommitDetail, &cache_key, &commit).await;
                Some(commit)
            }
            Err(e) => {
                warn!("commit detail fetch failed for {}@{}: {}", repo.key(), sha, e);
                None
            }
        }
    }
}

fn header_num(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}
