//! Deterministic scoring. No I/O; same inputs always produce the same
//! grades regardless of aggregation order.

/// Weighted activity score. PRs reflect more substantial completed work
/// than raw commits; issues are the lightest signal.
pub fn activity_score(commits: u64, pull_requests: u64, issues: u64) -> u64 {
    commits * 3 + pull_requests * 5 + issues
}

/// Effort bands, most demanding first. A band passes on the more generous
/// of its two thresholds: lines modified OR activity score.
const EFFORT_BANDS: [(&str, u64, u64); 10] = [
    ("A+", 1000, 100),
    ("A", 800, 85),
    ("A-", 600, 70),
    ("B+", 450, 60),
    ("B", 300, 50),
    ("B-", 200, 40),
    ("C+", 120, 30),
    ("C", 60, 20),
    ("C-", 30, 12),
    ("D+", 10, 5),
];

/// Maps lines-modified and activity score to one of 11 letter grades
/// (A+ down to D). First matching band wins.
pub fn effort_grade(lines_modified: u64, activity_score: u64) -> &'static str {
    for (grade, lines_over, score_at_least) in EFFORT_BANDS {
        if lines_modified > lines_over || activity_score >= score_at_least {
            return grade;
        }
    }
    "D"
}

/// Quality-score cutoffs at half-point steps, highest first.
const QUALITY_BANDS: [(&str, f64); 12] = [
    ("A+", 9.5),
    ("A", 9.0),
    ("A-", 8.5),
    ("B+", 8.0),
    ("B", 7.5),
    ("B-", 7.0),
    ("C+", 6.5),
    ("C", 6.0),
    ("C-", 5.5),
    ("D+", 5.0),
    ("D", 4.5),
    ("D-", 4.0),
];

/// Maps a continuous 1..10 quality score to a letter grade; anything below
/// 4.0 is an F.
pub fn grade_from_quality_score(score: f64) -> &'static str {
    for (grade, cutoff) in QUALITY_BANDS {
        if score >= cutoff {
            return grade;
        }
    }
    "F"
}
