use crate::config::PipelineConfig;
use crate::models::github::RepoRef;
use crate::models::report::{NarrativeResult, RepoStats, Report, Summary, TimeWindow, UserStats};
use crate::services::aggregator::{aggregate_repo, merge_aggregate, zero_fill, finalize_scores, RepoAggregate};
use crate::services::cache::ResponseCache;
use crate::services::collector::collect_commits;
use crate::services::github::GitHubClient;
use crate::services::narrative::{NarrativeClient, apply_quality_grades};
use chrono::Utc;
use futures::future::join_all;
use log::info;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Everything one run needs, constructed once and passed explicitly. No
/// implicit singletons and no process-wide flags.
pub struct PipelineContext {
    pub github: Arc<GitHubClient>,
    pub cache: Arc<ResponseCache>,
    pub narrative: Arc<NarrativeClient>,
    pub config: PipelineConfig,
}

/// Runs the full pipeline and assembles the report. Infallible by design:
/// every fetch degrades to partial data, and a report with fewer
/// contributors than expected is valid output.
pub async fn run_pipeline(ctx: &PipelineContext) -> Report {
    // Fresh start bounds memory growth across runs in a long-lived host.
    ctx.cache.clear().await;

    let window = TimeWindow::last_days(ctx.config.window_days);
    // A repo configured twice must not be aggregated twice: its shas would
    // count double for every contributor while the repo map entry is
    // simply overwritten, breaking the summary invariant.
    let mut seen_repos = HashSet::new();
    let repos: Vec<RepoRef> = ctx
        .config
        .repositories
        .iter()
        .filter(|r| seen_repos.insert((*r).clone()))
        .take(ctx.config.max_repos.max(1))
        .cloned()
        .collect();
    info!(
        "pipeline run starting: {} repositories, {} day window",
        repos.len(),
        ctx.config.window_days
    );

    let mut users: BTreeMap<String, UserStats> = BTreeMap::new();
    let mut repo_stats: BTreeMap<String, RepoStats> = BTreeMap::new();
    for batch in repos.chunks(ctx.config.repo_concurrency.max(1)) {
        let results = join_all(batch.iter().map(|repo| process_repo(ctx, repo, &window))).await;
        // Merge only after the whole batch settled.
        for aggregate in results {
            merge_aggregate(&mut users, &mut repo_stats, aggregate);
        }
    }

    let repo_keys: Vec<String> = repos.iter().map(|r| r.key()).collect();
    for key in &repo_keys {
        repo_stats.entry(key.clone()).or_default();
    }
    zero_fill(&mut users, &repo_keys);
    finalize_scores(&mut users);

    let narrative = if ctx.config.skip_narrative {
        None
    } else {
        ctx.narrative
            .score_top(&users, !ctx.config.skip_detailed_content)
            .await
    };
    if let Some(result) = &narrative {
        apply_quality_grades(&mut users, result);
    }

    let report = assemble(window, repo_keys, users, repo_stats, narrative);
    info!(
        "pipeline run finished: {} contributors, {} commits",
        report.summary.total_contributors, report.summary.total_commits
    );
    report
}

async fn process_repo(ctx: &PipelineContext, repo: &RepoRef, window: &TimeWindow) -> RepoAggregate {
    // Commits, PRs and issues feed disjoint statistic fields, so they are
    // fetched concurrently within the repo.
    let (commits, pulls, issues) = tokio::join!(
        collect_commits(&ctx.github, &ctx.config, repo, window),
        ctx.github.list_pulls(
            repo,
            window,
            ctx.config.page_size,
            ctx.config.max_list_pages
        ),
        ctx.github.list_issues(
            repo,
            window,
            ctx.config.page_size,
            ctx.config.max_list_pages
        ),
    );
    aggregate_repo(&ctx.github, &ctx.config, repo, commits, pulls, issues).await
}

/// Pure freeze step. Summary totals are a fold over the repository map so
/// they always equal the per-repository sums.
pub fn assemble(
    window: TimeWindow,
    repo_keys: Vec<String>,
    users: BTreeMap<String, UserStats>,
    repositories: BTreeMap<String, RepoStats>,
    narrative: Option<NarrativeResult>,
) -> Report {
    let mut summary = Summary {
        total_commits: 0,
        total_pull_requests: 0,
        total_merged_pull_requests: 0,
        total_issues: 0,
        total_closed_issues: 0,
        total_contributors: users.len() as u64,
        window,
        repositories: repo_keys,
    };
    for stats in repositories.values() {
        summary.total_commits += stats.commits;
        summary.total_pull_requests += stats.pull_requests;
        summary.total_merged_pull_requests += stats.merged_pull_requests;
        summary.total_issues += stats.issues;
        summary.total_closed_issues += stats.closed_issues;
    }

    Report {
        id: Uuid::new_v4().to_string(),
        generated_at: Utc::now(),
        summary,
        users,
        repositories,
        narrative,
        saved: false,
    }
}
