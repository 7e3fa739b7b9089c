//! Pure metric computations over a fetched set of pull requests.
//!
//! Nothing here performs I/O. Empty denominators resolve to zero so every function
//! returns a well-formed result for any input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: f64 = 1000.0 * 60.0 * 60.0;
const LONGEST_RUNNING_LIMIT: usize = 5;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

/// A pull request as fetched from upstream.
///
/// `merged_at` being set implies the pull request was closed; this is trusted as given.
#[derive(Clone, Debug, PartialEq)]
pub struct PullRequestRecord {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub state: PullRequestState,
    pub url: String,
}

impl PullRequestRecord {
    fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    fn hours_to_merge(&self) -> Option<f64> {
        self.merged_at.map(|merged_at| {
            (merged_at - self.created_at).num_milliseconds() as f64 / MILLIS_PER_HOUR
        })
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPullRequestView {
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub status: PullRequestState,
    pub number: u64,
    pub url: String,
}

/// Pull request funnel for one developer in one repository.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct DeveloperMetrics {
    #[serde(rename = "totalPRs")]
    pub total_prs: usize,
    #[serde(rename = "mergedPRs")]
    pub merged_prs: usize,
    /// Closed and merged. Always equal to `merged_prs`.
    #[serde(rename = "closedPRs")]
    pub closed_prs: usize,
    #[serde(rename = "closedButNotMergedPRs")]
    pub closed_but_not_merged_prs: usize,
    /// Percentage of the developer's pull requests that were merged.
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "averageMergeTimeHours")]
    pub average_merge_time_hours: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LongRunningPullRequest {
    pub title: String,
    pub number: u64,
    pub author: String,
    pub days_open: i64,
    pub url: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TimingMetrics {
    #[serde(rename = "averageTimeToMergeHours")]
    pub average_time_to_merge_hours: f64,
    #[serde(rename = "longestRunningPRs")]
    pub longest_running_prs: Vec<LongRunningPullRequest>,
}

/// Projects fetched records into the open pull request view, keeping upstream order.
///
/// The records are expected to come from an `open` state fetch; no filtering happens here.
pub fn list_open(records: &[PullRequestRecord]) -> Vec<OpenPullRequestView> {
    records
        .iter()
        .map(|pr| OpenPullRequestView {
            title: pr.title.clone(),
            author: pr.author.clone(),
            created_at: pr.created_at,
            status: pr.state,
            number: pr.number,
            url: pr.url.clone(),
        })
        .collect()
}

/// Computes the funnel metrics for pull requests authored by `developer`.
///
/// The author match is exact and case-sensitive. A developer with no pull requests gets
/// all-zero metrics.
pub fn developer_metrics(records: &[PullRequestRecord], developer: &str) -> DeveloperMetrics {
    let authored: Vec<&PullRequestRecord> =
        records.iter().filter(|pr| pr.author == developer).collect();

    let merged: Vec<&PullRequestRecord> =
        authored.iter().copied().filter(|pr| pr.is_merged()).collect();
    let closed_prs = authored
        .iter()
        .filter(|pr| pr.closed_at.is_some() && pr.merged_at.is_some())
        .count();
    let closed_but_not_merged_prs = authored
        .iter()
        .filter(|pr| pr.closed_at.is_some() && pr.merged_at.is_none())
        .count();

    let success_rate = if authored.is_empty() {
        0.0
    } else {
        merged.len() as f64 / authored.len() as f64 * 100.0
    };

    DeveloperMetrics {
        total_prs: authored.len(),
        merged_prs: merged.len(),
        closed_prs,
        closed_but_not_merged_prs,
        success_rate,
        average_merge_time_hours: average_hours_to_merge(merged.iter().copied()),
    }
}

/// Computes repository-wide merge timing and the longest running open pull requests.
///
/// `now` is the single reference point used for every age in the result.
pub fn timing_metrics(records: &[PullRequestRecord], now: DateTime<Utc>) -> TimingMetrics {
    let mut longest_running_prs: Vec<LongRunningPullRequest> = records
        .iter()
        .filter(|pr| pr.state == PullRequestState::Open)
        .map(|pr| LongRunningPullRequest {
            title: pr.title.clone(),
            number: pr.number,
            author: pr.author.clone(),
            days_open: days_open(pr.created_at, now),
            url: pr.url.clone(),
        })
        .collect();
    // Stable, so ties keep upstream order.
    longest_running_prs.sort_by(|a, b| b.days_open.cmp(&a.days_open));
    longest_running_prs.truncate(LONGEST_RUNNING_LIMIT);

    TimingMetrics {
        average_time_to_merge_hours: average_hours_to_merge(
            records.iter().filter(|pr| pr.is_merged()),
        ),
        longest_running_prs,
    }
}

/// Whole days between creation and `now`, rounded towards negative infinity.
fn days_open(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Mean creation-to-merge time in hours. An empty set averages to zero.
fn average_hours_to_merge<'a>(merged: impl Iterator<Item = &'a PullRequestRecord>) -> f64 {
    let (total, count) = merged
        .filter_map(PullRequestRecord::hours_to_merge)
        .fold((0.0, 0usize), |(total, count), hours| (total + hours, count + 1));

    total / count.max(1) as f64
}
