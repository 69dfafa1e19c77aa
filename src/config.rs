use crate::models::github::RepoRef;
use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::time::Duration;

lazy_static! {
    static ref REPO_SPEC_REGEX: Regex = Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$").unwrap();
}

/// Run-scoped configuration, built once at startup and passed explicitly
/// through every pipeline call. Nothing here is process-global.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub repositories: Vec<RepoRef>,
    pub window_days: i64,
    pub memory_optimized: bool,
    pub max_repos: usize,
    pub max_branch_pages: u32,
    /// Page ceiling for the PR and issue walks, independent of the
    /// per-branch commit ceiling.
    pub max_list_pages: u32,
    pub page_size: u32,
    pub branch_concurrency: usize,
    pub repo_concurrency: usize,
    pub detail_sample_size: usize,
    pub skip_detailed_content: bool,
    pub skip_narrative: bool,
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            window_days: 7,
            memory_optimized: false,
            max_repos: 20,
            max_branch_pages: 10,
            max_list_pages: 10,
            page_size: 100,
            branch_concurrency: 5,
            repo_concurrency: 5,
            detail_sample_size: 20,
            skip_detailed_content: false,
            skip_narrative: false,
            cache_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let repos_raw = env::var("REPOS")
            .map_err(|_| anyhow!("REPOS must be set (comma-separated owner/name pairs)"))?;
        let repositories = parse_repo_list(&repos_raw)?;

        let defaults = Self::default();
        let cfg = Self {
            repositories,
            window_days: env_num("WINDOW_DAYS", defaults.window_days),
            memory_optimized: env_flag("MEMORY_OPTIMIZED"),
            max_repos: env_num("MAX_REPOS", defaults.max_repos),
            max_branch_pages: env_num("MAX_BRANCH_PAGES", defaults.max_branch_pages),
            max_list_pages: env_num("MAX_LIST_PAGES", defaults.max_list_pages),
            page_size: env_num("PAGE_SIZE", defaults.page_size),
            branch_concurrency: env_num("BRANCH_CONCURRENCY", defaults.branch_concurrency),
            repo_concurrency: env_num("REPO_CONCURRENCY", defaults.repo_concurrency),
            detail_sample_size: env_num("DETAIL_SAMPLE_SIZE", defaults.detail_sample_size),
            skip_detailed_content: env_flag("SKIP_DETAILED_CONTENT"),
            skip_narrative: env_flag("SKIP_NARRATIVE"),
            cache_ttl: Duration::from_secs(env_num("CACHE_TTL_SECS", 30 * 60)),
        };

        Ok(cfg.effective())
    }

    /// Applies the memory-optimized profile: smaller pages, lower page
    /// ceilings, narrower fan-out. Idempotent.
    pub fn effective(mut self) -> Self {
        if self.memory_optimized {
            self.page_size = self.page_size.min(30);
            self.max_branch_pages = self.max_branch_pages.min(3);
            self.max_list_pages = self.max_list_pages.min(3);
            self.repo_concurrency = self.repo_concurrency.min(2);
            self.branch_concurrency = self.branch_concurrency.min(2);
        }
        self
    }
}

fn parse_repo_list(raw: &str) -> Result<Vec<RepoRef>> {
    let mut repos = Vec::new();
    for spec in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let caps = REPO_SPEC_REGEX
            .captures(spec)
            .ok_or_else(|| anyhow!("Invalid repository spec '{}', expected owner/name", spec))?;
        let repo = RepoRef {
            owner: caps[1].to_string(),
            name: caps[2].to_string(),
        };
        // A repo listed twice would be aggregated twice and double-count
        // every contributor.
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }
    if repos.is_empty() {
        return Err(anyhow!("REPOS contained no valid owner/name pairs"));
    }
    Ok(repos)
}

fn env_num<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}
