//! Reconciles source-control metrics: commit history, branches, contributors, issues.

use super::MetricsAdapter;
use crate::common::SourceKind;
use crate::events::{MetaEvent, RepositoryReport};
use crate::snapshot::{CommitRecord, RepositoryRates, RepositorySnapshot};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryAdapter;

/// Repository activity on a 0–100 scale.
///
/// Commits are worth up to 50 points, contributors up to 25, and open work
/// (branches plus issues) up to 25.
pub fn activity_score(snapshot: &RepositorySnapshot) -> u32 {
    let commit_points = (snapshot.commit_count() as f64 * 5.0).min(50.0);
    let contributor_points = (snapshot.contributor_count as f64 * 12.5).min(25.0);
    let development_points =
        ((snapshot.branch_count + snapshot.issue_count) as f64 * 5.0).min(25.0);
    (commit_points + contributor_points + development_points).floor() as u32
}

/// Influence label for an activity score.
pub fn influence_level(score: u32) -> &'static str {
    match score {
        0..=19 => "Local",
        20..=39 => "Growing",
        40..=59 => "Notable",
        60..=79 => "Significant",
        _ => "Widespread",
    }
}

fn random_sha(rng: &mut StdRng) -> String {
    format!("{:08x}", rng.gen::<u32>())
}

impl MetricsAdapter for RepositoryAdapter {
    type Snapshot = RepositorySnapshot;
    type Rates = RepositoryRates;

    fn source(&self) -> SourceKind {
        SourceKind::Repository
    }

    fn rates(
        &self,
        previous: Option<&RepositorySnapshot>,
        current: &RepositorySnapshot,
    ) -> RepositoryRates {
        RepositoryRates::between(previous, current)
    }

    fn to_partial(&self, snapshot: &RepositorySnapshot, _rates: &RepositoryRates) -> Value {
        let score = activity_score(snapshot);
        let contributors = snapshot.contributor_count;
        let status = match contributors {
            0 => "Limited",
            1 => "Emerging",
            _ => "Active",
        };
        json!({
            "resources": {
                "influence": {
                    "current": influence_level(score),
                    "rate": format!("Activity score: {}/100", score),
                },
            },
            "capabilities": {
                "collaboration": {
                    "status": status,
                    "efficiency": (contributors * 5).min(10) * 10,
                    "description": format!("{} contributors", contributors),
                },
            },
        })
    }

    fn report(
        &self,
        snapshot: &RepositorySnapshot,
        rates: &RepositoryRates,
        synthetic: bool,
    ) -> MetaEvent {
        let activity_score = activity_score(snapshot);
        MetaEvent::RepositoryMetricsUpdated(RepositoryReport {
            snapshot: snapshot.clone(),
            rates: rates.clone(),
            activity_score,
            influence_level: influence_level(activity_score).to_string(),
            synthetic,
        })
    }

    fn synthesize(
        &self,
        last: Option<&RepositorySnapshot>,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> RepositorySnapshot {
        match last {
            Some(last) if !last.commit_history.is_empty() => {
                let mut next = last.clone();
                if rng.gen_bool(0.2) {
                    next.commit_history.insert(
                        0,
                        CommitRecord {
                            sha: random_sha(rng),
                            message: format!("Commit message {}", next.commit_history.len()),
                            author: "Fallback Author".to_string(),
                            date: Some(now),
                        },
                    );
                }
                next.last_update = Some(now);
                next
            }
            _ => RepositorySnapshot {
                commit_history: (0..10)
                    .map(|i| CommitRecord {
                        sha: random_sha(rng),
                        message: format!("Commit message {}", i),
                        author: "Fallback Author".to_string(),
                        date: Some(now - Duration::days(i)),
                    })
                    .collect(),
                branch_count: rng.gen_range(2..=4),
                contributor_count: rng.gen_range(1..=2),
                issue_count: rng.gen_range(0..=4),
                last_update: Some(now),
            },
        }
    }

    fn stamp(&self, snapshot: &mut RepositorySnapshot, now: DateTime<Utc>) {
        snapshot.last_update.get_or_insert(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn repo(commits: usize, branches: u64, contributors: u64, issues: u64) -> RepositorySnapshot {
        RepositorySnapshot {
            commit_history: vec![CommitRecord::default(); commits],
            branch_count: branches,
            contributor_count: contributors,
            issue_count: issues,
            last_update: Some(Utc::now()),
        }
    }

    #[test]
    fn activity_score_caps_each_component() {
        assert_eq!(activity_score(&repo(0, 0, 0, 0)), 0);
        assert_eq!(activity_score(&repo(4, 1, 1, 0)), 20 + 12 + 5);
        assert_eq!(activity_score(&repo(40, 10, 9, 10)), 100);
    }

    #[test]
    fn influence_follows_score_buckets() {
        assert_eq!(influence_level(0), "Local");
        assert_eq!(influence_level(20), "Growing");
        assert_eq!(influence_level(59), "Notable");
        assert_eq!(influence_level(60), "Significant");
        assert_eq!(influence_level(100), "Widespread");
    }

    #[test]
    fn partial_sets_influence_and_collaboration() {
        let snap = repo(5, 2, 3, 1);
        let partial = RepositoryAdapter.to_partial(&snap, &RepositoryRates::default());
        assert_eq!(partial["resources"]["influence"]["current"], "Significant");
        assert_eq!(
            partial["resources"]["influence"]["rate"],
            "Activity score: 65/100"
        );
        let collaboration = &partial["capabilities"]["collaboration"];
        assert_eq!(collaboration["status"], "Active");
        assert_eq!(collaboration["efficiency"], 100);
        assert_eq!(collaboration["description"], "3 contributors");
    }

    #[test]
    fn synthesis_from_nothing_seeds_a_history() {
        let mut rng = StdRng::seed_from_u64(3);
        let snap = RepositoryAdapter.synthesize(None, Utc::now(), &mut rng);
        assert_eq!(snap.commit_count(), 10);
        assert!((2..=4).contains(&snap.branch_count));
        assert!((1..=2).contains(&snap.contributor_count));
        assert!(snap.issue_count <= 4);
    }

    #[test]
    fn synthesis_extends_the_last_history() {
        let mut rng = StdRng::seed_from_u64(3);
        let last = repo(7, 2, 2, 0);
        for _ in 0..20 {
            let next = RepositoryAdapter.synthesize(Some(&last), Utc::now(), &mut rng);
            assert!(next.commit_count() == 7 || next.commit_count() == 8);
            assert_eq!(next.contributor_count, 2);
        }
    }
}
