//! Contains common, primitive types shared across the metasync engine.
//!
//! This module defines the identifiers used to address bus subscriptions,
//! metric sources, and the individual metrics that singularity rules watch.
//! Using distinct types keeps those concepts from being mixed up as plain strings.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies a handler registered on the `EventBus`.
    ///
    /// This key is returned by `EventBus::subscribe` and is the only thing needed
    /// to remove the handler again. Keys are never reused, so a stale id can not
    /// accidentally unsubscribe somebody else's handler.
    pub struct SubscriptionId;
}

/// Identifies an external metric source feeding a reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Development/usage metrics: tokens, session cost, code churn.
    Usage,
    /// Source-control metrics: commit history, branches, contributors.
    Repository,
}

impl SourceKind {
    /// The prefix used for this source's topics on the bus.
    pub fn topic_prefix(self) -> &'static str {
        match self {
            SourceKind::Usage => "claudeMetrics",
            SourceKind::Repository => "github",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Usage => "usage",
            SourceKind::Repository => "repository",
        })
    }
}

/// A single numeric reading a singularity rule can be evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    TotalTokens,
    LinesModified,
    /// Commits reported by the usage source (`code.commitCount`).
    CodeCommitCount,
    /// Length of the source-control commit history.
    RepositoryCommitCount,
    SessionCost,
    ContributorCount,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::TotalTokens => "totalTokens",
            Metric::LinesModified => "linesModified",
            Metric::CodeCommitCount => "code.commitCount",
            Metric::RepositoryCommitCount => "commitHistory.length",
            Metric::SessionCost => "sessionCost",
            Metric::ContributorCount => "contributorCount",
        })
    }
}

/// Anything that can report metric readings to the trigger engine.
///
/// A source returns `None` for metrics it does not carry, which keeps rules
/// for other sources from firing on missing data.
pub trait MetricReadings {
    fn reading(&self, metric: Metric) -> Option<f64>;
}
