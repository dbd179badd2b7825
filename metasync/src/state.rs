//! The meta-game state tree.
//!
//! These structs mirror the persisted JSON document (camelCase keys) so a
//! snapshot can be loaded straight from disk and a partial update can be merged
//! through `serde_json::Value` and read back into the typed model.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The root of the meta-state, owned exclusively by the `MetaStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaState {
    pub meta: MetaInfo,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default)]
    pub progress: BTreeMap<String, ProgressTrack>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, Capability>,
    #[serde(default)]
    pub upgrades: Upgrades,
    #[serde(default)]
    pub singularity_events: Vec<SingularityEvent>,
    #[serde(default)]
    pub development_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaInfo {
    pub version: String,
    pub last_updated: NaiveDate,
    pub phase: String,
}

/// A value that is either a number or a qualitative label.
///
/// Resources such as `influence` use an ordered label scale while others are
/// plain counters. Bonus application only ever touches the `Amount` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Amount(f64),
    Label(String),
}

impl Quantity {
    pub fn as_amount(&self) -> Option<f64> {
        match self {
            Quantity::Amount(value) => Some(*value),
            Quantity::Label(_) => None,
        }
    }

    pub fn label(text: impl Into<String>) -> Self {
        Quantity::Label(text.into())
    }

    /// True when both sides are numbers or both are labels.
    pub fn same_kind(&self, other: &Quantity) -> bool {
        self.as_amount().is_some() == other.as_amount().is_some()
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Quantity::Amount(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Amount(value) if value.fract() == 0.0 => write!(f, "{}", *value as i64),
            Quantity::Amount(value) => write!(f, "{:.2}", value),
            Quantity::Label(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub current: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTrack {
    pub current: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_threshold: Option<Quantity>,
    /// 0–100 when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How far a capability has developed.
///
/// Lowercase spellings are accepted on input since metric reconcilers and
/// older snapshots write them that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapabilityStatus {
    #[default]
    #[serde(alias = "limited")]
    Limited,
    #[serde(alias = "emerging")]
    Emerging,
    #[serde(alias = "active")]
    Active,
    #[serde(alias = "read")]
    Read,
}

impl std::str::FromStr for CapabilityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "limited" => Ok(CapabilityStatus::Limited),
            "emerging" => Ok(CapabilityStatus::Emerging),
            "active" => Ok(CapabilityStatus::Active),
            "read" => Ok(CapabilityStatus::Read),
            other => Err(format!("unknown capability status '{}'", other)),
        }
    }
}

impl fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(default)]
    pub status: CapabilityStatus,
    /// 0–100.
    #[serde(default)]
    pub efficiency: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrades {
    #[serde(default)]
    pub available: Vec<Upgrade>,
    #[serde(default)]
    pub completed: Vec<Upgrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub id: String,
    pub name: String,
    pub cost: Quantity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub benefit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<NaiveDate>,
}

/// A one-shot milestone. `id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingularityEvent {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub bonuses: Vec<String>,
    pub timestamp: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: NaiveDate,
    pub event: String,
    pub resource_change: String,
}

impl MetaState {
    /// Whether a singularity with this id has already fired.
    pub fn has_singularity(&self, id: &str) -> bool {
        self.singularity_events.iter().any(|event| event.id == id)
    }

    /// Finds the first `current` value that `next` stores as a different kind.
    ///
    /// Only entries present on both sides are compared. Returns the dotted path
    /// of the offending value.
    pub fn kind_change(&self, next: &MetaState) -> Option<String> {
        let resources = self.resources.iter().filter_map(|(name, before)| {
            let after = next.resources.get(name)?;
            (!before.current.same_kind(&after.current))
                .then(|| format!("resources.{}.current", name))
        });
        let progress = self.progress.iter().filter_map(|(name, before)| {
            let after = next.progress.get(name)?;
            (!before.current.same_kind(&after.current))
                .then(|| format!("progress.{}.current", name))
        });
        resources.chain(progress).next()
    }
}

fn resource(current: Quantity, rate: Option<&str>, description: &str) -> Resource {
    Resource {
        current,
        rate: rate.map(str::to_string),
        description: Some(description.to_string()),
    }
}

fn track(
    current: Quantity,
    next_threshold: Quantity,
    progress_percentage: Option<f64>,
    description: &str,
) -> ProgressTrack {
    ProgressTrack {
        current,
        next_threshold: Some(next_threshold),
        progress_percentage,
        description: Some(description.to_string()),
    }
}

/// The documented starting point used when no persisted snapshot is available.
impl Default for MetaState {
    fn default() -> Self {
        let today = Utc::now().date_naive();

        let resources = BTreeMap::from([
            (
                "computingPower".to_string(),
                resource(
                    Quantity::Amount(1000.0),
                    Some("~100/minute"),
                    "Tokens used in development interactions",
                ),
            ),
            (
                "data".to_string(),
                resource(
                    Quantity::Amount(1.0),
                    None,
                    "Files created or significantly modified",
                ),
            ),
            (
                "influence".to_string(),
                resource(Quantity::label("None"), None, "Reach and impact of the system"),
            ),
            (
                "funding".to_string(),
                resource(
                    Quantity::Amount(0.0),
                    None,
                    "Attention and engagement resources",
                ),
            ),
        ]);

        let progress = BTreeMap::from([
            (
                "developmentPhase".to_string(),
                track(
                    Quantity::label("Narrow AI"),
                    Quantity::label("Early General AI"),
                    Some(10.0),
                    "Current evolutionary stage of the AI system",
                ),
            ),
            (
                "conceptClarity".to_string(),
                track(
                    Quantity::Amount(20.0),
                    Quantity::Amount(50.0),
                    None,
                    "How well-defined the core concept is",
                ),
            ),
            (
                "implementation".to_string(),
                track(
                    Quantity::Amount(5.0),
                    Quantity::Amount(25.0),
                    None,
                    "Progress toward a playable system",
                ),
            ),
            (
                "metaRecursion".to_string(),
                track(
                    Quantity::Amount(0.0),
                    Quantity::Amount(1.0),
                    None,
                    "Depth of self-reference in the system",
                ),
            ),
        ]);

        let capabilities = BTreeMap::from([(
            "fileCreation".to_string(),
            Capability {
                status: CapabilityStatus::Limited,
                efficiency: 50.0,
                description: "Ability to create and modify files".to_string(),
            },
        )]);

        Self {
            meta: MetaInfo {
                version: "0.1.0".to_string(),
                last_updated: today,
                phase: "Narrow AI".to_string(),
            },
            resources,
            progress,
            capabilities,
            upgrades: Upgrades::default(),
            singularity_events: Vec::new(),
            development_history: vec![HistoryEntry {
                timestamp: today,
                event: "Meta-State Initialization".to_string(),
                resource_change: "Default meta-state seeded".to_string(),
            }],
        }
    }
}
