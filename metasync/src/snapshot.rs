//! Point-in-time metric snapshots delivered by the external sources, and the
//! per-minute rates computed between two consecutive snapshots of one source.

use crate::common::{Metric, MetricReadings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The smallest interval rates are divided by, one second expressed in minutes.
pub const MIN_ELAPSED_MINUTES: f64 = 1.0 / 60.0;

/// Minutes between two update stamps, floored at [`MIN_ELAPSED_MINUTES`].
pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let minutes = (to - from).num_milliseconds() as f64 / 60_000.0;
    minutes.max(MIN_ELAPSED_MINUTES)
}

/// `(new - old) / elapsed_minutes`.
pub fn rate_per_minute(old: f64, new: f64, elapsed_minutes: f64) -> f64 {
    (new - old) / elapsed_minutes.max(MIN_ELAPSED_MINUTES)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    /// Minutes.
    #[serde(default)]
    pub duration: f64,
    /// Dollars.
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCounts {
    #[serde(default)]
    pub lines_modified: u64,
    #[serde(default)]
    pub files_modified: u64,
    #[serde(default)]
    pub commit_count: u64,
    #[serde(default)]
    pub pr_count: u64,
}

/// Development/usage metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default)]
    pub tokens: TokenCounts,
    #[serde(default)]
    pub session: SessionInfo,
    #[serde(default)]
    pub code: CodeCounts,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl MetricReadings for UsageSnapshot {
    fn reading(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::TotalTokens => Some(self.tokens.total as f64),
            Metric::LinesModified => Some(self.code.lines_modified as f64),
            Metric::CodeCommitCount => Some(self.code.commit_count as f64),
            Metric::SessionCost => Some(self.session.cost),
            Metric::RepositoryCommitCount | Metric::ContributorCount => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageRates {
    pub input_per_minute: f64,
    pub output_per_minute: f64,
    pub total_per_minute: f64,
    pub lines_per_minute: f64,
    pub cost_per_minute: f64,
}

impl UsageRates {
    /// Rates between two snapshots of the usage lineage.
    ///
    /// The first snapshot of a lineage has nothing to diff against and yields zeros.
    pub fn between(previous: Option<&UsageSnapshot>, current: &UsageSnapshot) -> Self {
        let Some(previous) = previous else {
            return Self::default();
        };
        let elapsed = match (previous.last_update, current.last_update) {
            (Some(from), Some(to)) => elapsed_minutes(from, to),
            _ => 1.0,
        };
        Self {
            input_per_minute: rate_per_minute(
                previous.tokens.input as f64,
                current.tokens.input as f64,
                elapsed,
            ),
            output_per_minute: rate_per_minute(
                previous.tokens.output as f64,
                current.tokens.output as f64,
                elapsed,
            ),
            total_per_minute: rate_per_minute(
                previous.tokens.total as f64,
                current.tokens.total as f64,
                elapsed,
            ),
            lines_per_minute: rate_per_minute(
                previous.code.lines_modified as f64,
                current.code.lines_modified as f64,
                elapsed,
            ),
            cost_per_minute: rate_per_minute(previous.session.cost, current.session.cost, elapsed),
        }
    }
}

/// One commit as reported by the source-control endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Source-control metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySnapshot {
    #[serde(default)]
    pub commit_history: Vec<CommitRecord>,
    #[serde(default)]
    pub branch_count: u64,
    #[serde(default)]
    pub contributor_count: u64,
    #[serde(default)]
    pub issue_count: u64,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl RepositorySnapshot {
    pub fn commit_count(&self) -> u64 {
        self.commit_history.len() as u64
    }
}

impl MetricReadings for RepositorySnapshot {
    fn reading(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::RepositoryCommitCount => Some(self.commit_count() as f64),
            Metric::ContributorCount => Some(self.contributor_count as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryRates {
    pub commits_per_minute: f64,
}

impl RepositoryRates {
    pub fn between(previous: Option<&RepositorySnapshot>, current: &RepositorySnapshot) -> Self {
        let Some(previous) = previous else {
            return Self::default();
        };
        let elapsed = match (previous.last_update, current.last_update) {
            (Some(from), Some(to)) => elapsed_minutes(from, to),
            _ => 1.0,
        };
        Self {
            commits_per_minute: rate_per_minute(
                previous.commit_count() as f64,
                current.commit_count() as f64,
                elapsed,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn usage_at(total: u64, at: DateTime<Utc>) -> UsageSnapshot {
        UsageSnapshot {
            tokens: TokenCounts {
                input: total / 4,
                output: total - total / 4,
                total,
            },
            last_update: Some(at),
            ..Default::default()
        }
    }

    #[test]
    fn token_rate_is_per_minute() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = usage_at(1000, t0);
        let b = usage_at(1500, t0 + Duration::minutes(2));
        let rates = UsageRates::between(Some(&a), &b);
        assert_eq!(rates.total_per_minute, 250.0);
    }

    #[test]
    fn near_simultaneous_updates_do_not_blow_up() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = usage_at(1000, t0);
        let b = usage_at(1010, t0);
        let rates = UsageRates::between(Some(&a), &b);
        assert!(rates.total_per_minute.is_finite());
        assert!((rates.total_per_minute - 600.0).abs() < 1e-6);

        let backwards = usage_at(1010, t0 - Duration::minutes(5));
        assert!(UsageRates::between(Some(&a), &backwards).total_per_minute.is_finite());
    }

    #[test]
    fn first_snapshot_has_zero_rates() {
        let snapshot = usage_at(5000, Utc::now());
        assert_eq!(UsageRates::between(None, &snapshot), UsageRates::default());
    }

    #[test]
    fn usage_snapshot_decodes_the_wire_shape() {
        let raw = r#"{
            "tokens": { "input": 1200, "output": 4800, "total": 6000 },
            "session": { "id": "s-1", "duration": 42.5, "cost": 0.38 },
            "code": { "linesModified": 320, "filesModified": 7, "commitCount": 3, "prCount": 1 },
            "lastUpdate": "2025-06-01T12:00:00Z"
        }"#;
        let snapshot: UsageSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.reading(Metric::TotalTokens), Some(6000.0));
        assert_eq!(snapshot.reading(Metric::LinesModified), Some(320.0));
        assert_eq!(snapshot.reading(Metric::ContributorCount), None);
        assert_eq!(snapshot.session.id.as_deref(), Some("s-1"));
    }

    #[test]
    fn repository_snapshot_counts_commit_history() {
        let raw = r#"{
            "commitHistory": [{ "sha": "a1" }, { "sha": "b2", "message": "fix" }],
            "branchCount": 3,
            "contributorCount": 2,
            "issueCount": 1
        }"#;
        let snapshot: RepositorySnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.reading(Metric::RepositoryCommitCount), Some(2.0));
        assert_eq!(snapshot.reading(Metric::CodeCommitCount), None);
        assert_eq!(snapshot.reading(Metric::ContributorCount), Some(2.0));
        assert_eq!(snapshot.reading(Metric::TotalTokens), None);
    }
}
