use crate::config::PipelineConfig;
use crate::models::github::{Commit, Issue, PullRequest, RepoRef};
use crate::models::report::{RepoStats, UserRepoStats, UserStats};
use crate::services::github::GitHubClient;
use crate::services::scoring;
use crate::utils::text::truncate_chars;
use log::debug;
use std::collections::BTreeMap;

/// Caps on the text retained for the narrative stage.
const MAX_CONTENT_SAMPLES: usize = 8;
const SAMPLE_TITLE_CHARS: usize = 200;
const SAMPLE_PATCH_CHARS: usize = 300;

fn push_sample(user: &mut UserStats, sample: String) {
    if user.content_samples.len() < MAX_CONTENT_SAMPLES {
        user.content_samples.push(sample);
    }
}

/// Per-repository fold result. Built in isolation by one repo task and
/// merged into the shared maps after the batch settles, so concurrent
/// repos never race on shared state.
pub struct RepoAggregate {
    pub repo_key: String,
    pub users: BTreeMap<String, UserStats>,
    pub repo: RepoStats,
}

/// Creates the accumulator for a contributor on first sighting.
pub fn ensure_user<'a>(
    users: &'a mut BTreeMap<String, UserStats>,
    identity: &str,
    login_resolved: bool,
) -> &'a mut UserStats {
    users.entry(identity.to_string()).or_insert_with(|| UserStats {
        identity: identity.to_string(),
        login_resolved,
        ..UserStats::default()
    })
}

/// Creates the contributor's per-repository entry on first sighting.
pub fn ensure_user_repo<'a>(user: &'a mut UserStats, repo_key: &str) -> &'a mut UserRepoStats {
    user.repositories.entry(repo_key.to_string()).or_default()
}

/// Folds one repository's raw events into per-user and per-repo
/// statistics. Commits arrive already deduplicated and windowed.
pub async fn aggregate_repo(
    client: &GitHubClient,
    cfg: &PipelineConfig,
    repo: &RepoRef,
    commits: Vec<Commit>,
    pulls: Vec<PullRequest>,
    issues: Vec<Issue>,
) -> RepoAggregate {
    let repo_key = repo.key();
    let mut users: BTreeMap<String, UserStats> = BTreeMap::new();
    let mut repo_stats = RepoStats::default();

    // Group by contributor up front; one map lookup per contributor
    // instead of one per event.
    let mut by_author: BTreeMap<(String, bool), Vec<Commit>> = BTreeMap::new();
    for commit in commits {
        by_author.entry(commit.author_identity()).or_default().push(commit);
    }

    for ((identity, login_resolved), authored) in by_author {
        let commit_count = authored.len() as u64;
        repo_stats.commits += commit_count;
        repo_stats.record_contributor(&identity);

        let (mut added, mut deleted, mut modified) = (0u64, 0u64, 0u64);
        let mut patch_samples = Vec::new();
        if !cfg.skip_detailed_content {
            // Bounded sample per contributor; full per-commit detail for
            // every commit would not fit the remote-call budget.
            let sample = authored.iter().take(cfg.detail_sample_size);
            for commit in sample {
                let Some(detail) = client.get_commit_detail(repo, &commit.sha).await else {
                    continue;
                };
                if let Some(stats) = &detail.stats {
                    added += stats.additions;
                    deleted += stats.deletions;
                    modified += stats.total;
                } else if let Some(files) = &detail.files {
                    for file in files {
                        added += file.additions;
                        deleted += file.deletions;
                        modified += file.changes;
                    }
                }
                if let Some(patch) = detail
                    .files
                    .as_deref()
                    .and_then(|files| files.first())
                    .and_then(|f| f.patch.as_deref())
                {
                    patch_samples.push(truncate_chars(patch, SAMPLE_PATCH_CHARS));
                }
            }
        }

        let user = ensure_user(&mut users, &identity, login_resolved);
        for commit in authored.iter().take(2) {
            push_sample(user, format!("commit: {}", truncate_chars(&commit.commit.message, SAMPLE_TITLE_CHARS)));
        }
        for patch in patch_samples {
            push_sample(user, format!("patch: {}", patch));
        }
        user.commits += commit_count;
        user.lines_added += added;
        user.lines_deleted += deleted;
        user.lines_modified += modified;
        let per_repo = ensure_user_repo(user, &repo_key);
        per_repo.commits += commit_count;
        per_repo.lines_added += added;
        per_repo.lines_deleted += deleted;
        per_repo.lines_modified += modified;

        repo_stats.lines_added += added;
        repo_stats.lines_deleted += deleted;
        repo_stats.lines_modified += modified;
    }

    for pull in &pulls {
        let Some(author) = &pull.user else { continue };
        repo_stats.pull_requests += 1;
        if pull.merged_at.is_some() {
            repo_stats.merged_pull_requests += 1;
        }
        repo_stats.record_contributor(&author.login);

        let user = ensure_user(&mut users, &author.login, true);
        user.pull_requests += 1;
        if pull.merged_at.is_some() {
            user.merged_pull_requests += 1;
        }
        push_sample(user, format!("PR: {}", truncate_chars(&pull.title, SAMPLE_TITLE_CHARS)));
        ensure_user_repo(user, &repo_key).pull_requests += 1;
    }

    for issue in &issues {
        // The issues API conflates pull requests with issues.
        if issue.is_pull_request() {
            continue;
        }
        let Some(author) = &issue.user else { continue };
        repo_stats.issues += 1;
        if issue.closed_at.is_some() || issue.state == "closed" {
            repo_stats.closed_issues += 1;
        }
        repo_stats.record_contributor(&author.login);

        let user = ensure_user(&mut users, &author.login, true);
        user.issues += 1;
        if issue.closed_at.is_some() || issue.state == "closed" {
            user.closed_issues += 1;
        }
        push_sample(user, format!("issue: {}", truncate_chars(&issue.title, SAMPLE_TITLE_CHARS)));
        ensure_user_repo(user, &repo_key).issues += 1;
    }

    debug!(
        "{}: aggregated {} contributors, {} commits, {} PRs, {} issues",
        repo_key,
        users.len(),
        repo_stats.commits,
        repo_stats.pull_requests,
        repo_stats.issues
    );

    RepoAggregate {
        repo_key,
        users,
        repo: repo_stats,
    }
}

/// Folds a settled repo aggregate into the run-wide maps. Sequential by
/// construction; called only after a batch has been awaited.
pub fn merge_aggregate(
    users: &mut BTreeMap<String, UserStats>,
    repos: &mut BTreeMap<String, RepoStats>,
    aggregate: RepoAggregate,
) {
    for (identity, partial) in aggregate.users {
        let user = ensure_user(users, &identity, partial.login_resolved);
        user.login_resolved = user.login_resolved || partial.login_resolved;
        user.commits += partial.commits;
        user.pull_requests += partial.pull_requests;
        user.merged_pull_requests += partial.merged_pull_requests;
        user.issues += partial.issues;
        user.closed_issues += partial.closed_issues;
        user.lines_added += partial.lines_added;
        user.lines_deleted += partial.lines_deleted;
        user.lines_modified += partial.lines_modified;
        for sample in partial.content_samples {
            push_sample(user, sample);
        }
        for (repo_key, repo_partial) in partial.repositories {
            let entry = ensure_user_repo(user, &repo_key);
            entry.commits += repo_partial.commits;
            entry.pull_requests += repo_partial.pull_requests;
            entry.issues += repo_partial.issues;
            entry.lines_added += repo_partial.lines_added;
            entry.lines_deleted += repo_partial.lines_deleted;
            entry.lines_modified += repo_partial.lines_modified;
        }
    }
    repos.insert(aggregate.repo_key, aggregate.repo);
}

/// Every user gets an entry for every configured repository, zero-filled
/// where there was no activity.
pub fn zero_fill(users: &mut BTreeMap<String, UserStats>, repo_keys: &[String]) {
    for user in users.values_mut() {
        for key in repo_keys {
            user.repositories.entry(key.clone()).or_default();
        }
    }
}

/// Freeze point: derived fields are computed once, after every mutating
/// batch has settled.
pub fn finalize_scores(users: &mut BTreeMap<String, UserStats>) {
    for user in users.values_mut() {
        user.activity_score = scoring::activity_score(user.commits, user.pull_requests, user.issues);
        user.effort_grade =
            Some(scoring::effort_grade(user.lines_modified, user.activity_score).to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::github::{Author, CommitAuthor, CommitDetail};
    use crate::services::cache::ResponseCache;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn repo() -> RepoRef {
        RepoRef { owner: "o".into(), name: "r".into() }
    }

    fn commit(sha: &str, login: Option<&str>, name: &str) -> Commit {
        Commit {
            sha: sha.to_string(),
            commit: CommitDetail {
                author: CommitAuthor {
                    name: name.to_string(),
                    email: format!("{}@example.com", name),
                    date: Utc::now(),
                },
                message: "change".to_string(),
            },
            author: login.map(|l| Author { login: l.to_string() }),
            files: None,
            stats: None,
        }
    }

    fn pull(number: u64, login: &str, merged: bool) -> PullRequest {
        PullRequest {
            number,
            title: format!("pr {}", number),
            user: Some(Author { login: login.to_string() }),
            state: if merged { "closed" } else { "open" }.to_string(),
            created_at: Utc::now(),
            merged_at: merged.then(Utc::now),
        }
    }

    fn issue(number: u64, login: &str, closed: bool, conflated_pr: bool) -> Issue {
        Issue {
            number,
            title: format!("issue {}", number),
            user: Some(Author { login: login.to_string() }),
            state: if closed { "closed" } else { "open" }.to_string(),
            created_at: Utc::now(),
            closed_at: closed.then(Utc::now),
            pull_request: conflated_pr.then(|| serde_json::json!({"url": "x"})),
        }
    }

    fn offline_client() -> GitHubClient {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        GitHubClient::new(None, cache)
            .unwrap()
            .with_base_url("http://127.0.0.1:1")
    }

    fn skip_detail_cfg() -> PipelineConfig {
        PipelineConfig {
            skip_detailed_content: true,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn counts_events_per_user_and_repo() {
        let agg = aggregate_repo(
            &offline_client(),
            &skip_detail_cfg(),
            &repo(),
            vec![
                commit("a", Some("alice"), "Alice"),
                commit("b", Some("alice"), "Alice"),
                commit("c", Some("bob"), "Bob"),
            ],
            vec![pull(1, "alice", true), pull(2, "bob", false)],
            vec![issue(3, "alice", true, false)],
        )
        .await;

        let alice = &agg.users["alice"];
        assert_eq!(alice.commits, 2);
        assert_eq!(alice.pull_requests, 1);
        assert_eq!(alice.merged_pull_requests, 1);
        assert_eq!(alice.issues, 1);
        assert_eq!(alice.closed_issues, 1);
        assert_eq!(alice.repositories["o/r"].commits, 2);

        assert_eq!(agg.repo.commits, 3);
        assert_eq!(agg.repo.pull_requests, 2);
        assert_eq!(agg.repo.merged_pull_requests, 1);
        assert_eq!(agg.repo.issues, 1);
        assert_eq!(agg.repo.contributors.len(), 2);
    }

    #[tokio::test]
    async fn fallback_identity_stays_distinct_from_login() {
        let agg = aggregate_repo(
            &offline_client(),
            &skip_detail_cfg(),
            &repo(),
            vec![
                commit("a", Some("alice"), "Alice Smith"),
                commit("b", None, "Alice Smith"),
            ],
            vec![],
            vec![],
        )
        .await;

        assert_eq!(agg.users.len(), 2);
        assert!(agg.users["alice"].login_resolved);
        assert!(!agg.users["Alice Smith"].login_resolved);
    }

    #[tokio::test]
    async fn pr_conflated_issues_are_excluded() {
        let agg = aggregate_repo(
            &offline_client(),
            &skip_detail_cfg(),
            &repo(),
            vec![],
            vec![],
            vec![issue(1, "alice", false, true), issue(2, "alice", false, false)],
        )
        .await;

        assert_eq!(agg.users["alice"].issues, 1);
        assert_eq!(agg.repo.issues, 1);
    }

    #[tokio::test]
    async fn detail_sampling_is_capped() {
        let mut server = mockito::Server::new_async().await;
        let detail_body = format!(
            r#"{{"sha": "a", "commit": {{"author": {{"name": "Alice", "email": "a@example.com", "date": "{}"}}, "message": "m"}}, "author": {{"login": "alice"}}, "stats": {{"additions": 10, "deletions": 4, "total": 14}}}}"#,
            Utc::now().to_rfc3339()
        );
        let detail = server
            .mock("GET", mockito::Matcher::Regex(r"^/repos/o/r/commits/".to_string()))
            .with_status(200)
            .with_body(detail_body)
            .expect(1)
            .create_async()
            .await;

        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        let client = GitHubClient::new(None, cache)
            .unwrap()
            .with_base_url(&server.url());
        let cfg = PipelineConfig {
            detail_sample_size: 1,
            ..PipelineConfig::default()
        };

        let agg = aggregate_repo(
            &client,
            &cfg,
            &repo(),
            vec![commit("a", Some("alice"), "Alice"), commit("b", Some("alice"), "Alice")],
            vec![],
            vec![],
        )
        .await;

        detail.assert_async().await;
        let alice = &agg.users["alice"];
        assert_eq!(alice.commits, 2);
        assert_eq!(alice.lines_added, 10);
        assert_eq!(alice.lines_deleted, 4);
        assert_eq!(alice.lines_modified, 14);
    }

    #[tokio::test]
    async fn merge_and_zero_fill_cover_all_repositories() {
        let agg = aggregate_repo(
            &offline_client(),
            &skip_detail_cfg(),
            &repo(),
            vec![commit("a", Some("alice"), "Alice")],
            vec![],
            vec![],
        )
        .await;

        let mut users = BTreeMap::new();
        let mut repos = BTreeMap::new();
        merge_aggregate(&mut users, &mut repos, agg);
        zero_fill(
            &mut users,
            &["o/r".to_string(), "o/other".to_string()],
        );

        let alice = &users["alice"];
        assert_eq!(alice.repositories["o/r"].commits, 1);
        assert_eq!(alice.repositories["o/other"].commits, 0);
        assert_eq!(repos["o/r"].commits, 1);
    }

    #[tokio::test]
    async fn finalize_computes_score_and_grade() {
        let agg = aggregate_repo(
            &offline_client(),
            &skip_detail_cfg(),
            &repo(),
            vec![
                commit("a", Some("alice"), "Alice"),
                commit("b", Some("alice"), "Alice"),
                commit("c", Some("alice"), "Alice"),
            ],
            vec![],
            vec![],
        )
        .await;

        let mut users = BTreeMap::new();
        let mut repos = BTreeMap::new();
        merge_aggregate(&mut users, &mut repos, agg);
        finalize_scores(&mut users);

        let alice = &users["alice"];
        assert_eq!(alice.activity_score, 9);
        assert_eq!(alice.effort_grade.as_deref(), Some("D+"));
    }
}
