use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Inclusion boundary for all raw events in one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Per-contributor accumulator. Mutated during aggregation, frozen once
/// scores are computed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub identity: String,
    /// False when the identity is a display-name fallback for a commit with
    /// no linked platform account; such contributors stay distinct.
    pub login_resolved: bool,
    pub commits: u64,
    pub pull_requests: u64,
    pub merged_pull_requests: u64,
    pub issues: u64,
    pub closed_issues: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub lines_modified: u64,
    pub repositories: BTreeMap<String, UserRepoStats>,
    /// Truncated commit/PR/issue text retained for the narrative stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_samples: Vec<String>,
    pub activity_score: u64,
    pub effort_grade: Option<String>,
    pub quality_grade: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRepoStats {
    pub commits: u64,
    pub pull_requests: u64,
    pub issues: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub lines_modified: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStats {
    pub commits: u64,
    pub pull_requests: u64,
    pub merged_pull_requests: u64,
    pub issues: u64,
    pub closed_issues: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub lines_modified: u64,
    pub contributors: Vec<String>,
}

impl RepoStats {
    pub fn record_contributor(&mut self, identity: &str) {
        if !self.contributors.iter().any(|c| c == identity) {
            self.contributors.push(identity.to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_commits: u64,
    pub total_pull_requests: u64,
    pub total_merged_pull_requests: u64,
    pub total_issues: u64,
    pub total_closed_issues: u64,
    pub total_contributors: u64,
    pub window: TimeWindow,
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorNarrative {
    pub identity: String,
    pub assessment: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_for_improvement: Vec<String>,
    pub quality_score: f64,
    #[serde(default)]
    pub code_quality_grade: Option<String>,
    #[serde(default)]
    pub effort_grade: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeResult {
    pub summary: String,
    pub contributors: Vec<ContributorNarrative>,
}

/// The assembled report. Immutable once built; ownership moves to the
/// caller (store, handler) and the pipeline keeps no reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    pub users: BTreeMap<String, UserStats>,
    pub repositories: BTreeMap<String, RepoStats>,
    #[serde(default)]
    pub narrative: Option<NarrativeResult>,
    /// False when the persistence collaborator failed; the in-memory report
    /// is still delivered.
    pub saved: bool,
}
