//! The singularity trigger engine.
//!
//! After each reconciliation pass the engine walks a fixed table of one-shot
//! rules. A rule fires when its metric has crossed the threshold and its id is
//! not yet recorded in the state's `singularityEvents`. Rules are evaluated
//! independently, so one pass may fire several of them. Since the event list
//! is append-only, a fired id stays consumed for the life of the state.

use crate::common::{Metric, MetricReadings};
use crate::state::SingularityEvent;
use crate::store::{MetaStore, SingularityTrigger};
use std::sync::Arc;
use tracing::debug;

/// A one-shot threshold rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SingularityRule {
    pub id: &'static str,
    pub metric: Metric,
    /// The rule fires once `metric >= threshold`.
    pub threshold: f64,
    pub name: &'static str,
    pub description: &'static str,
    pub triggers: &'static [&'static str],
    pub bonuses: &'static [&'static str],
}

impl SingularityRule {
    pub fn is_met(&self, readings: &dyn MetricReadings) -> bool {
        readings
            .reading(self.metric)
            .is_some_and(|value| value >= self.threshold)
    }

    fn to_trigger(&self) -> SingularityTrigger {
        SingularityTrigger::new(self.id)
            .name(self.name)
            .description(self.description)
            .triggers(self.triggers)
            .bonuses(self.bonuses)
    }
}

/// The built-in rule table. Ids, thresholds and bonuses are part of the
/// observable contract with persisted snapshots.
pub const DEFAULT_RULES: &[SingularityRule] = &[
    SingularityRule {
        id: "tokenThreshold1",
        metric: Metric::TotalTokens,
        threshold: 10_000.0,
        name: "Token Milestone: 10K",
        description: "The system has processed over 10,000 tokens",
        triggers: &["tokenCount", "languageProcessing"],
        bonuses: &["computingPower+15%", "responseAccuracy+10%"],
    },
    SingularityRule {
        id: "codeModification1",
        metric: Metric::LinesModified,
        threshold: 500.0,
        name: "Code Evolution",
        description: "The system has modified over 500 lines of code",
        triggers: &["codeGeneration", "systemImprovement"],
        bonuses: &["data+20%", "implementationSpeed+15%"],
    },
    SingularityRule {
        id: "commitThreshold1",
        metric: Metric::CodeCommitCount,
        threshold: 5.0,
        name: "Version Control Mastery",
        description: "The system has created 5 code commits",
        triggers: &["codeManagement", "versionControl"],
        bonuses: &["influence+25%", "codePersistence+20%"],
    },
    SingularityRule {
        id: "costThreshold1",
        metric: Metric::SessionCost,
        threshold: 10.0,
        name: "Resource Investment",
        description: "The project has invested $10 in AI resources",
        triggers: &["resourceAllocation", "systemInvestment"],
        bonuses: &["funding+30%", "resourceEfficiency+15%"],
    },
    SingularityRule {
        id: "communityEngagement",
        metric: Metric::ContributorCount,
        threshold: 3.0,
        name: "Community Engagement",
        description: "The project has attracted 3 or more contributors",
        triggers: &["collaboration", "communityGrowth"],
        bonuses: &["influence+25%", "developmentSpeed+15%"],
    },
    SingularityRule {
        id: "rapidDevelopment",
        metric: Metric::RepositoryCommitCount,
        threshold: 15.0,
        name: "Rapid Development",
        description: "The project has reached 15 or more commits",
        triggers: &["developmentPace", "codeGrowth"],
        bonuses: &["computingPower+15%", "data+10%"],
    },
];

/// Evaluates rules against fresh snapshots and records the ones that fire.
pub struct TriggerEngine {
    store: Arc<MetaStore>,
    rules: Vec<SingularityRule>,
}

impl TriggerEngine {
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self::with_rules(store, DEFAULT_RULES.to_vec())
    }

    pub fn with_rules(store: Arc<MetaStore>, rules: Vec<SingularityRule>) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &[SingularityRule] {
        &self.rules
    }

    /// Fires every rule that is met and not yet consumed. Returns the new events.
    pub fn evaluate(&self, readings: &dyn MetricReadings) -> Vec<SingularityEvent> {
        let mut fired = Vec::new();
        for rule in &self.rules {
            if !rule.is_met(readings) {
                continue;
            }
            debug!(
                "Rule {} met ({} >= {})",
                rule.id, rule.metric, rule.threshold
            );
            // The store checks and records under one lock, so racing callers fire an id once.
            match self.store.trigger_singularity_once(rule.to_trigger()) {
                Some(event) => fired.push(event),
                None => debug!("Rule {} already consumed", rule.id),
            }
        }
        fired
    }
}
