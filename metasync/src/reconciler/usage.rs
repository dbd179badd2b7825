//! Reconciles development/usage metrics: tokens, session cost and code churn.

use super::MetricsAdapter;
use crate::common::SourceKind;
use crate::events::{MetaEvent, UsageReport};
use crate::snapshot::{CodeCounts, SessionInfo, TokenCounts, UsageRates, UsageSnapshot};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Value};

/// Dollars per input token.
const INPUT_TOKEN_PRICE: f64 = 15.0 / 1_000_000.0;
/// Dollars per output token.
const OUTPUT_TOKEN_PRICE: f64 = 75.0 / 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAdapter;

/// Influence label from commit and PR activity: `commits + 3 * prs`.
pub fn influence_level(commit_count: u64, pr_count: u64) -> &'static str {
    match commit_count + pr_count * 3 {
        score if score >= 20 => "Widespread",
        score if score >= 12 => "Notable",
        score if score >= 5 => "Growing",
        _ => "Local",
    }
}

/// Development phase from a weighted blend of all usage counters.
pub fn development_phase(snapshot: &UsageSnapshot) -> &'static str {
    let score = snapshot.tokens.total as f64 / 5000.0
        + snapshot.code.lines_modified as f64 / 50.0
        + snapshot.code.commit_count as f64 * 2.0
        + snapshot.code.pr_count as f64 * 5.0;
    if score >= 50.0 {
        "Superintelligence"
    } else if score >= 25.0 {
        "General AI"
    } else if score >= 10.0 {
        "Neural Networks"
    } else {
        "Narrow AI"
    }
}

/// Session cost for the given token counts.
pub fn session_cost(input: u64, output: u64) -> f64 {
    input as f64 * INPUT_TOKEN_PRICE + output as f64 * OUTPUT_TOKEN_PRICE
}

fn bump(value: u64, cap: u64, probability: f64, rng: &mut StdRng) -> u64 {
    if value < cap && rng.gen_bool(probability) {
        value + 1
    } else {
        value
    }
}

impl MetricsAdapter for UsageAdapter {
    type Snapshot = UsageSnapshot;
    type Rates = UsageRates;

    fn source(&self) -> SourceKind {
        SourceKind::Usage
    }

    fn rates(&self, previous: Option<&UsageSnapshot>, current: &UsageSnapshot) -> UsageRates {
        UsageRates::between(previous, current)
    }

    fn to_partial(&self, snapshot: &UsageSnapshot, rates: &UsageRates) -> Value {
        let tokens = &snapshot.tokens;
        let code = &snapshot.code;
        json!({
            "resources": {
                "computingPower": {
                    "current": tokens.total,
                    "rate": format!("{}/min", rates.total_per_minute.round() as i64),
                },
                "data": {
                    "current": code.lines_modified,
                    "rate": format!("{:.1}/min", rates.lines_per_minute),
                },
                "influence": {
                    "current": influence_level(code.commit_count, code.pr_count),
                },
                "funding": {
                    "current": (snapshot.session.cost * 100.0).round() / 100.0,
                    "rate": format!("${:.4}/min", rates.cost_per_minute),
                },
            },
            "progress": {
                "developmentPhase": { "current": development_phase(snapshot) },
            },
            "capabilities": {
                "tokenGeneration": {
                    "status": "Active",
                    "description": "Generate tokens for natural language processing",
                    "efficiency": (50.0 + tokens.total as f64 / 10_000.0).min(95.0),
                },
                "codeModification": {
                    "status": "Active",
                    "description": "Modify code files and generate new content",
                    "efficiency": (40.0 + code.lines_modified as f64 / 100.0).min(95.0),
                },
                "versionControl": {
                    "status": if code.commit_count > 0 { "Active" } else { "Limited" },
                    "description": "Create git commits and manage code versions",
                    "efficiency": (30.0 + code.commit_count as f64 * 5.0).min(90.0),
                },
                "pullRequestGeneration": {
                    "status": if code.pr_count > 0 { "Active" } else { "Emerging" },
                    "description": "Generate and manage pull requests",
                    "efficiency": (20.0 + code.pr_count as f64 * 15.0).min(85.0),
                },
            },
        })
    }

    fn report(&self, snapshot: &UsageSnapshot, rates: &UsageRates, synthetic: bool) -> MetaEvent {
        MetaEvent::UsageMetricsUpdated(UsageReport {
            snapshot: snapshot.clone(),
            rates: rates.clone(),
            synthetic,
        })
    }

    fn synthesize(
        &self,
        last: Option<&UsageSnapshot>,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> UsageSnapshot {
        let last = last.cloned().unwrap_or_default();
        let since = last.last_update.unwrap_or(now - Duration::hours(1));
        let minutes = ((now - since).num_milliseconds() as f64 / 60_000.0).max(0.0);

        let input = last.tokens.input + (minutes * rng.gen_range(50.0..150.0)).floor() as u64;
        let output = last.tokens.output + (minutes * rng.gen_range(200.0..500.0)).floor() as u64;

        UsageSnapshot {
            tokens: TokenCounts {
                input,
                output,
                total: input + output,
            },
            session: SessionInfo {
                id: last
                    .session
                    .id
                    .or_else(|| Some(format!("fallback-session-{}", now.timestamp_millis()))),
                duration: last.session.duration + minutes,
                cost: session_cost(input, output),
            },
            code: CodeCounts {
                lines_modified: last.code.lines_modified
                    + (minutes * rng.gen_range(5.0..20.0)).floor() as u64,
                files_modified: bump(last.code.files_modified, 30, 0.3, rng),
                commit_count: bump(last.code.commit_count, 12, 0.1, rng),
                pr_count: bump(last.code.pr_count, 5, 0.05, rng),
            },
            last_update: Some(now),
        }
    }

    fn stamp(&self, snapshot: &mut UsageSnapshot, now: DateTime<Utc>) {
        snapshot.last_update.get_or_insert(now);
    }
}
