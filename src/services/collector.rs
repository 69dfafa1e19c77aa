use crate::config::PipelineConfig;
use crate::models::github::{Commit, RepoRef};
use crate::models::report::TimeWindow;
use crate::services::github::GitHubClient;
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;

/// Names likely to carry most of a repository's recent activity. A
/// scheduling heuristic only: every branch is still visited.
const PRIMARY_BRANCHES: [&str; 5] = ["main", "master", "develop", "staging", "production"];

const BRANCH_PRIORITY_THRESHOLD: usize = 3;

/// Collects the repository's commits within the window across all
/// branches, deduplicated by sha.
pub async fn collect_commits(
    client: &GitHubClient,
    cfg: &PipelineConfig,
    repo: &RepoRef,
    window: &TimeWindow,
) -> Vec<Commit> {
    let mut branches = match client.list_branches(repo).await {
        Ok(branches) => branches.into_iter().map(|b| b.name).collect::<Vec<_>>(),
        Err(e) => {
            warn!(
                "branch enumeration failed for {}: {}, falling back to default branch",
                repo.key(),
                e
            );
            let default = client
                .get_repository(repo)
                .await
                .map(|r| r.default_branch)
                .unwrap_or_else(|| "main".to_string());
            vec![default]
        }
    };

    if branches.is_empty() {
        return Vec::new();
    }
    if branches.len() > BRANCH_PRIORITY_THRESHOLD {
        prioritize_branches(&mut branches);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut commits = Vec::new();
    for batch in branches.chunks(cfg.branch_concurrency.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|branch| collect_branch(client, cfg, repo, branch, window)),
        )
        .await;
        for branch_commits in results {
            for commit in branch_commits {
                // A commit visible on several branches counts once.
                if seen.insert(commit.sha.clone()) {
                    commits.push(commit);
                }
            }
        }
    }

    info!(
        "{}: {} unique commits across {} branches",
        repo.key(),
        commits.len(),
        branches.len()
    );
    commits
}

/// Stable reorder putting primary-named branches first. All branches stay
/// in the list.
fn prioritize_branches(branches: &mut [String]) {
    branches.sort_by_key(|b| usize::from(!PRIMARY_BRANCHES.contains(&b.as_str())));
}

async fn collect_branch(
    client: &GitHubClient,
    cfg: &PipelineConfig,
    repo: &RepoRef,
    branch: &str,
    window: &TimeWindow,
) -> Vec<Commit> {
    // Cheap existence probe before paying for full pagination.
    let probe = client.list_commits_page(repo, branch, window, 1, 1).await;
    if probe.items.is_empty() {
        debug!("{}@{}: no activity in window, skipping", repo.key(), branch);
        return Vec::new();
    }

    let mut commits = Vec::new();
    for page in 1..=cfg.max_branch_pages.max(1) {
        let chunk = client
            .list_commits_page(repo, branch, window, page, cfg.page_size)
            .await;
        let has_more = chunk.has_more;
        commits.extend(chunk.items);
        if !has_more {
            break;
        }
    }
    commits
}
