//! Defines all event types published on the metasync `EventBus`.
//!
//! Every topic carries exactly one payload shape. Handlers subscribe to a
//! `Topic` and receive the matching `MetaEvent` variant, so no handler ever has
//! to guess what an untyped payload contains.

use crate::common::SourceKind;
use crate::snapshot::{RepositoryRates, RepositorySnapshot, UsageRates, UsageSnapshot};
use crate::state::{CapabilityStatus, HistoryEntry, MetaState, SingularityEvent, Upgrade};
use std::fmt;
use std::sync::Arc;

/// A named channel on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `meta:state:initialized`
    StateInitialized,
    /// `meta:state:updated`
    StateUpdated,
    /// `meta:singularity:complete`
    SingularityComplete,
    /// `meta:capability:updated`
    CapabilityUpdated,
    /// `meta:upgrade:completed`
    UpgradeCompleted,
    /// `meta:history:entry:added`
    HistoryEntryAdded,
    /// `<source>:connectionStatus`
    ConnectionStatus(SourceKind),
    /// `claudeMetrics:updated` / `github:metrics:updated`
    MetricsUpdated(SourceKind),
}

impl Topic {
    /// The wire name of the topic, as the UI layer knows it.
    pub fn name(&self) -> String {
        match self {
            Topic::StateInitialized => "meta:state:initialized".to_string(),
            Topic::StateUpdated => "meta:state:updated".to_string(),
            Topic::SingularityComplete => "meta:singularity:complete".to_string(),
            Topic::CapabilityUpdated => "meta:capability:updated".to_string(),
            Topic::UpgradeCompleted => "meta:upgrade:completed".to_string(),
            Topic::HistoryEntryAdded => "meta:history:entry:added".to_string(),
            Topic::ConnectionStatus(source) => format!("{}:connectionStatus", source.topic_prefix()),
            Topic::MetricsUpdated(SourceKind::Usage) => "claudeMetrics:updated".to_string(),
            Topic::MetricsUpdated(SourceKind::Repository) => "github:metrics:updated".to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Payload of `meta:capability:updated`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityUpdate {
    pub capability: String,
    pub status: CapabilityStatus,
    pub efficiency: f64,
}

/// Payload of `<source>:connectionStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub source: SourceKind,
    pub connected: bool,
    pub endpoint: String,
}

/// Payload of `claudeMetrics:updated`.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub snapshot: UsageSnapshot,
    pub rates: UsageRates,
    /// True when the snapshot was synthesized after a transport failure.
    pub synthetic: bool,
}

/// Payload of `github:metrics:updated`.
#[derive(Debug, Clone)]
pub struct RepositoryReport {
    pub snapshot: RepositorySnapshot,
    pub rates: RepositoryRates,
    pub activity_score: u32,
    pub influence_level: String,
    pub synthetic: bool,
}

/// Events broadcast by the store and the reconcilers.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    /// The store finished loading its initial state.
    StateInitialized(Arc<MetaState>),
    /// The state changed. Carries the post-change snapshot.
    StateUpdated(Arc<MetaState>),
    /// A singularity event was recorded and its bonuses applied.
    SingularityComplete(SingularityEvent),
    CapabilityUpdated(CapabilityUpdate),
    UpgradeCompleted(Upgrade),
    HistoryEntryAdded(HistoryEntry),
    /// A reconciler's connectivity changed.
    ConnectionStatus(ConnectionStatus),
    UsageMetricsUpdated(UsageReport),
    RepositoryMetricsUpdated(RepositoryReport),
}

impl MetaEvent {
    /// The topic this event is delivered on.
    pub fn topic(&self) -> Topic {
        match self {
            MetaEvent::StateInitialized(_) => Topic::StateInitialized,
            MetaEvent::StateUpdated(_) => Topic::StateUpdated,
            MetaEvent::SingularityComplete(_) => Topic::SingularityComplete,
            MetaEvent::CapabilityUpdated(_) => Topic::CapabilityUpdated,
            MetaEvent::UpgradeCompleted(_) => Topic::UpgradeCompleted,
            MetaEvent::HistoryEntryAdded(_) => Topic::HistoryEntryAdded,
            MetaEvent::ConnectionStatus(status) => Topic::ConnectionStatus(status.source),
            MetaEvent::UsageMetricsUpdated(_) => Topic::MetricsUpdated(SourceKind::Usage),
            MetaEvent::RepositoryMetricsUpdated(_) => Topic::MetricsUpdated(SourceKind::Repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_match_the_ui_contract() {
        assert_eq!(Topic::StateUpdated.name(), "meta:state:updated");
        assert_eq!(Topic::SingularityComplete.name(), "meta:singularity:complete");
        assert_eq!(Topic::HistoryEntryAdded.name(), "meta:history:entry:added");
        assert_eq!(
            Topic::ConnectionStatus(SourceKind::Usage).name(),
            "claudeMetrics:connectionStatus"
        );
        assert_eq!(
            Topic::ConnectionStatus(SourceKind::Repository).name(),
            "github:connectionStatus"
        );
        assert_eq!(
            Topic::MetricsUpdated(SourceKind::Repository).to_string(),
            "github:metrics:updated"
        );
    }

    #[test]
    fn connection_status_routes_by_source() {
        let event = MetaEvent::ConnectionStatus(ConnectionStatus {
            source: SourceKind::Repository,
            connected: true,
            endpoint: "http://localhost:3000/github-metrics".into(),
        });
        assert_eq!(event.topic(), Topic::ConnectionStatus(SourceKind::Repository));
    }
}
