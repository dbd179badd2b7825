//! The MetaState store: the single owner of the meta-game state tree.
//!
//! All mutation goes through the methods below. Each method takes the lock,
//! runs to completion, releases the lock and only then publishes on the bus, so
//! a handler that reads or updates the store from inside its callback never
//! deadlocks and never observes a half-applied change.

use crate::bonus::{apply_bonuses, parse_bonuses, BonusOutcome};
use crate::bus::EventBus;
use crate::error::{MetaError, Result};
use crate::events::{CapabilityUpdate, MetaEvent};
use crate::state::{
    Capability, CapabilityStatus, HistoryEntry, MetaState, Quantity, SingularityEvent, Upgrade,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request to record a singularity event. Missing fields take documented defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingularityTrigger {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub triggers: Vec<String>,
    pub bonuses: Vec<String>,
}

impl SingularityTrigger {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn triggers<S: ToString>(mut self, triggers: &[S]) -> Self {
        self.triggers = triggers.iter().map(ToString::to_string).collect();
        self
    }

    pub fn bonuses<S: ToString>(mut self, bonuses: &[S]) -> Self {
        self.bonuses = bonuses.iter().map(ToString::to_string).collect();
        self
    }
}

pub struct MetaStore {
    bus: Arc<EventBus>,
    state: Mutex<MetaState>,
}

impl MetaStore {
    /// Creates a store around an already-built state.
    pub fn new(bus: Arc<EventBus>, initial: MetaState) -> Self {
        Self {
            bus,
            state: Mutex::new(initial),
        }
    }

    /// Loads the persisted snapshot at `path`, falling back to the default state.
    ///
    /// A missing or unreadable snapshot is never fatal.
    pub fn load(bus: Arc<EventBus>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let initial = match Self::read_snapshot(path) {
            Ok(mut state) => {
                info!("Loaded meta-state from {}", path.display());
                numeric_funding(&mut state);
                state
            }
            Err(err) => {
                warn!(
                    "Could not load meta-state from {} ({}); using default state",
                    path.display(),
                    err
                );
                MetaState::default()
            }
        };
        let store = Self::new(bus, initial);
        store
            .bus
            .publish(MetaEvent::StateInitialized(Arc::new(store.get_state())));
        store
    }

    /// Reads and decodes a persisted snapshot.
    pub fn read_snapshot(path: &Path) -> Result<MetaState> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Returns an isolated copy of the current state.
    pub fn get_state(&self) -> MetaState {
        self.state.lock().clone()
    }

    pub fn has_singularity(&self, id: &str) -> bool {
        self.state.lock().has_singularity(id)
    }

    /// Deep-merges `partial` into the state.
    ///
    /// Mappings merge key by key; every other value (arrays included) replaces
    /// what was there. If the merged tree no longer fits the schema, or an
    /// existing resource or progress value switches between number and label,
    /// the state is left untouched and the error is returned.
    pub fn update_state(&self, partial: Value) -> Result<()> {
        if !partial.is_object() {
            return Err(MetaError::InvalidPartial(format!(
                "expected a mapping, got {}",
                partial
            )));
        }

        let snapshot = {
            let mut state = self.state.lock();
            let mut tree = serde_json::to_value(&*state)?;
            deep_merge(&mut tree, partial);
            let mut merged: MetaState =
                serde_json::from_value(tree).map_err(|err| MetaError::Schema(err.to_string()))?;
            if let Some(path) = state.kind_change(&merged) {
                return Err(MetaError::Schema(format!(
                    "{} cannot switch between a number and a label",
                    path
                )));
            }
            merged.meta.last_updated = Utc::now().date_naive();
            *state = merged;
            Arc::new(state.clone())
        };

        debug!("Meta-state updated");
        self.bus.publish(MetaEvent::StateUpdated(snapshot));
        Ok(())
    }

    /// Records a singularity event and applies its bonuses.
    ///
    /// The event is appended unconditionally; callers that need one-shot
    /// semantics use `trigger_singularity_once`.
    pub fn trigger_singularity(&self, trigger: SingularityTrigger) -> SingularityEvent {
        let event = build_event(trigger);
        let (entry, snapshot) = append_singularity(&mut self.state.lock(), &event);
        self.announce_singularity(&event, entry, snapshot);
        event
    }

    /// Records the event only if its id has not fired yet.
    ///
    /// The check and the append happen under one lock, so concurrent callers
    /// racing on the same id record it exactly once.
    pub fn trigger_singularity_once(
        &self,
        trigger: SingularityTrigger,
    ) -> Option<SingularityEvent> {
        let event = build_event(trigger);
        let (entry, snapshot) = {
            let mut state = self.state.lock();
            if state.has_singularity(&event.id) {
                debug!("Singularity {} already recorded", event.id);
                return None;
            }
            append_singularity(&mut state, &event)
        };
        self.announce_singularity(&event, entry, snapshot);
        Some(event)
    }

    fn announce_singularity(
        &self,
        event: &SingularityEvent,
        entry: HistoryEntry,
        snapshot: Arc<MetaState>,
    ) {
        info!("Singularity event '{}' ({}) triggered", event.name, event.id);
        self.bus.publish(MetaEvent::HistoryEntryAdded(entry));
        self.bus.publish(MetaEvent::SingularityComplete(event.clone()));
        self.bus.publish(MetaEvent::StateUpdated(snapshot));
    }

    /// Moves an upgrade from `available` to `completed`.
    ///
    /// An unknown id is logged and leaves the state untouched.
    pub fn complete_upgrade(&self, id: &str) -> Option<Upgrade> {
        let today = Utc::now().date_naive();
        let (upgrade, entry, snapshot) = {
            let mut state = self.state.lock();
            let Some(index) = state.upgrades.available.iter().position(|u| u.id == id) else {
                warn!("Upgrade {} not found in available upgrades", id);
                return None;
            };
            let mut upgrade = state.upgrades.available.remove(index);
            upgrade.completed_at = Some(today);
            state.upgrades.completed.push(upgrade.clone());
            let entry = HistoryEntry {
                timestamp: today,
                event: format!("Upgrade Completed: {}", upgrade.name),
                resource_change: format!("Benefit: {}", upgrade.benefit),
            };
            state.development_history.push(entry.clone());
            state.meta.last_updated = today;
            (upgrade, entry, Arc::new(state.clone()))
        };

        info!("Upgrade '{}' completed", upgrade.name);
        self.bus.publish(MetaEvent::HistoryEntryAdded(entry));
        self.bus.publish(MetaEvent::UpgradeCompleted(upgrade.clone()));
        self.bus.publish(MetaEvent::StateUpdated(snapshot));
        Some(upgrade)
    }

    /// Creates or adjusts a capability.
    pub fn update_capability(
        &self,
        name: &str,
        status: Option<CapabilityStatus>,
        efficiency: Option<f64>,
    ) -> Capability {
        let (capability, snapshot) = {
            let mut state = self.state.lock();
            let capability = state
                .capabilities
                .entry(name.to_string())
                .and_modify(|existing| {
                    if let Some(status) = status {
                        existing.status = status;
                    }
                    if let Some(efficiency) = efficiency {
                        existing.efficiency = efficiency.clamp(0.0, 100.0);
                    }
                })
                .or_insert_with(|| Capability {
                    status: status.unwrap_or(CapabilityStatus::Limited),
                    efficiency: efficiency.unwrap_or(10.0).clamp(0.0, 100.0),
                    description: format!("Ability related to {}", name),
                })
                .clone();
            state.meta.last_updated = Utc::now().date_naive();
            (capability, Arc::new(state.clone()))
        };

        self.bus.publish(MetaEvent::CapabilityUpdated(CapabilityUpdate {
            capability: name.to_string(),
            status: capability.status,
            efficiency: capability.efficiency,
        }));
        self.bus.publish(MetaEvent::StateUpdated(snapshot));
        capability
    }

    /// Parses and applies bonus strings outside of any singularity event.
    pub fn apply_bonuses<S: AsRef<str>>(&self, bonuses: &[S]) -> Vec<BonusOutcome> {
        let bonuses = parse_bonuses(bonuses);
        if bonuses.is_empty() {
            return Vec::new();
        }
        let (outcomes, snapshot) = {
            let mut state = self.state.lock();
            let outcomes = apply_bonuses(&mut state, &bonuses);
            state.meta.last_updated = Utc::now().date_naive();
            (outcomes, Arc::new(state.clone()))
        };

        self.bus.publish(MetaEvent::StateUpdated(snapshot));
        outcomes
    }

    /// Appends a development history entry.
    pub fn add_history_entry(
        &self,
        event: impl Into<String>,
        resource_change: impl Into<String>,
    ) -> HistoryEntry {
        let today = Utc::now().date_naive();
        let entry = HistoryEntry {
            timestamp: today,
            event: event.into(),
            resource_change: resource_change.into(),
        };
        let snapshot = {
            let mut state = self.state.lock();
            state.development_history.push(entry.clone());
            state.meta.last_updated = today;
            Arc::new(state.clone())
        };

        self.bus.publish(MetaEvent::HistoryEntryAdded(entry.clone()));
        self.bus.publish(MetaEvent::StateUpdated(snapshot));
        entry
    }
}

/// Usage reconciliation writes the session cost to `funding`, so older
/// snapshots that stored it as a label start again from zero.
fn numeric_funding(state: &mut MetaState) {
    if let Some(funding) = state.resources.get_mut("funding") {
        if funding.current.as_amount().is_none() {
            debug!("Resetting labelled funding '{}' to 0", funding.current);
            funding.current = Quantity::Amount(0.0);
        }
    }
}

fn build_event(trigger: SingularityTrigger) -> SingularityEvent {
    SingularityEvent {
        id: trigger
            .id
            .unwrap_or_else(|| format!("singularity-{}", Utc::now().timestamp_millis())),
        name: trigger
            .name
            .unwrap_or_else(|| "Unnamed Singularity".to_string()),
        description: trigger
            .description
            .unwrap_or_else(|| "A singularity event occurred".to_string()),
        triggers: trigger.triggers,
        bonuses: trigger.bonuses,
        timestamp: Utc::now().date_naive(),
    }
}

/// Appends the event and its history entry, then applies its bonuses.
fn append_singularity(
    state: &mut MetaState,
    event: &SingularityEvent,
) -> (HistoryEntry, Arc<MetaState>) {
    let entry = HistoryEntry {
        timestamp: event.timestamp,
        event: format!("Singularity Event: {}", event.name),
        resource_change: format!("Triggered by: {}", event.triggers.join(", ")),
    };
    state.singularity_events.push(event.clone());
    state.development_history.push(entry.clone());
    apply_bonuses(state, &parse_bonuses(&event.bonuses));
    state.meta.last_updated = event.timestamp;
    (entry, Arc::new(state.clone()))
}

/// Merges `partial` into `target`: objects recurse, everything else replaces.
pub fn deep_merge(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let recurse = value.is_object() && existing.get(&key).is_some_and(Value::is_object);
                if recurse {
                    if let Some(slot) = existing.get_mut(&key) {
                        deep_merge(slot, value);
                    }
                } else {
                    existing.insert(key, value);
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use serde_json::json;

    fn store() -> (Arc<EventBus>, MetaStore) {
        let bus = Arc::new(EventBus::new());
        let store = MetaStore::new(bus.clone(), MetaState::default());
        (bus, store)
    }

    fn record(bus: &EventBus, topic: Topic) -> Arc<Mutex<Vec<MetaEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(topic, move |event| sink.lock().push(event.clone()));
        seen
    }

    #[test]
    fn deep_merge_recurses_into_mappings_and_replaces_the_rest() {
        let mut target = json!({ "a": { "b": 1, "c": [1, 2] }, "d": 4 });
        deep_merge(&mut target, json!({ "a": { "c": [3], "e": 5 }, "d": { "x": 1 } }));
        assert_eq!(target, json!({ "a": { "b": 1, "c": [3], "e": 5 }, "d": { "x": 1 } }));
    }

    #[test]
    fn scalar_leaves_are_replaced_not_accumulated() {
        let (_bus, store) = store();
        store
            .update_state(json!({ "resources": { "computingPower": { "current": 5 } } }))
            .unwrap();
        store
            .update_state(json!({ "resources": { "computingPower": { "current": 7 } } }))
            .unwrap();
        let state = store.get_state();
        assert_eq!(state.resources["computingPower"].current, Quantity::Amount(7.0));
        assert_eq!(
            state.resources["computingPower"].rate.as_deref(),
            Some("~100/minute")
        );
    }

    #[test]
    fn new_keys_preserve_existing_siblings() {
        let (_bus, store) = store();
        store
            .update_state(json!({ "resources": { "insight": { "current": 3 } } }))
            .unwrap();
        let state = store.get_state();
        for key in ["computingPower", "data", "influence", "funding", "insight"] {
            assert!(state.resources.contains_key(key), "missing {}", key);
        }
    }

    #[test]
    fn arrays_replace_wholesale() {
        let (_bus, store) = store();
        store
            .update_state(json!({ "developmentHistory": [] }))
            .unwrap();
        assert!(store.get_state().development_history.is_empty());
    }

    #[test]
    fn rejected_merges_leave_state_untouched() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::StateUpdated);
        let before = store.get_state();

        assert!(matches!(
            store.update_state(json!(42)),
            Err(MetaError::InvalidPartial(_))
        ));
        assert!(matches!(
            store.update_state(json!({ "resources": [1, 2, 3] })),
            Err(MetaError::Schema(_))
        ));
        assert_eq!(store.get_state(), before);
        assert!(updates.lock().is_empty());
    }

    #[test]
    fn resource_values_keep_their_kind() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::StateUpdated);
        let before = store.get_state();

        for partial in [
            json!({ "resources": { "funding": { "current": "Abstract" } } }),
            json!({ "resources": { "influence": { "current": 3 } } }),
            json!({ "progress": { "developmentPhase": { "current": 2 } } }),
            json!({ "progress": { "conceptClarity": { "current": "Clear" } } }),
        ] {
            let err = store.update_state(partial).unwrap_err();
            assert!(matches!(err, MetaError::Schema(_)), "{:?}", err);
        }
        assert_eq!(store.get_state(), before);
        assert!(updates.lock().is_empty());

        store
            .update_state(json!({
                "resources": {
                    "funding": { "current": 0.38 },
                    "influence": { "current": "Growing" },
                    "reputation": { "current": "Unknown" }
                }
            }))
            .unwrap();
        let state = store.get_state();
        assert_eq!(state.resources["funding"].current, Quantity::Amount(0.38));
        assert_eq!(state.resources["influence"].current, Quantity::label("Growing"));
        assert_eq!(updates.lock().len(), 1);
    }

    #[test]
    fn get_state_is_a_defensive_copy() {
        let (_bus, store) = store();
        let mut copy = store.get_state();
        copy.resources.clear();
        copy.singularity_events.push(SingularityEvent {
            id: "x".into(),
            name: "x".into(),
            description: String::new(),
            triggers: vec![],
            bonuses: vec![],
            timestamp: Utc::now().date_naive(),
        });
        let fresh = store.get_state();
        assert_eq!(fresh.resources.len(), 4);
        assert!(fresh.singularity_events.is_empty());
    }

    #[test]
    fn update_publishes_the_new_snapshot() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::StateUpdated);
        store
            .update_state(json!({ "meta": { "phase": "General AI" } }))
            .unwrap();
        let seen = updates.lock();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            MetaEvent::StateUpdated(state) => assert_eq!(state.meta.phase, "General AI"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn trigger_appends_history_and_applies_bonuses() {
        let (bus, store) = store();
        let completions = record(&bus, Topic::SingularityComplete);
        store
            .update_state(json!({ "resources": { "data": { "current": 100 } } }))
            .unwrap();

        let event = store.trigger_singularity(
            SingularityTrigger::new("codeModification1")
                .name("Code Evolution")
                .triggers(&["codeGeneration"])
                .bonuses(&["data+20%", "implementationSpeed+15%"]),
        );

        let state = store.get_state();
        assert_eq!(event.id, "codeModification1");
        assert_eq!(state.singularity_events, vec![event]);
        assert_eq!(state.resources["data"].current, Quantity::Amount(120.0));
        let last = state.development_history.last().unwrap();
        assert_eq!(last.event, "Singularity Event: Code Evolution");
        assert_eq!(last.resource_change, "Triggered by: codeGeneration");
        assert_eq!(completions.lock().len(), 1);
    }

    #[test]
    fn trigger_does_not_deduplicate() {
        let (_bus, store) = store();
        store.trigger_singularity(SingularityTrigger::new("dup"));
        store.trigger_singularity(SingularityTrigger::new("dup"));
        assert_eq!(store.get_state().singularity_events.len(), 2);
    }

    #[test]
    fn trigger_once_records_each_id_a_single_time() {
        let (bus, store) = store();
        let completions = record(&bus, Topic::SingularityComplete);
        let history_before = store.get_state().development_history.len();

        let first = store.trigger_singularity_once(
            SingularityTrigger::new("commitThreshold1").bonuses(&["data+20%"]),
        );
        let second = store.trigger_singularity_once(
            SingularityTrigger::new("commitThreshold1").bonuses(&["data+20%"]),
        );

        assert_eq!(first.map(|event| event.id).as_deref(), Some("commitThreshold1"));
        assert_eq!(second, None);
        let state = store.get_state();
        assert_eq!(state.singularity_events.len(), 1);
        assert_eq!(state.development_history.len(), history_before + 1);
        assert_eq!(state.resources["data"].current, Quantity::Amount(1.2));
        assert_eq!(completions.lock().len(), 1);
    }

    #[test]
    fn trigger_fills_in_defaults() {
        let (_bus, store) = store();
        let event = store.trigger_singularity(SingularityTrigger::default());
        assert!(event.id.starts_with("singularity-"));
        assert_eq!(event.name, "Unnamed Singularity");
        assert_eq!(event.description, "A singularity event occurred");
        assert!(event.triggers.is_empty() && event.bonuses.is_empty());
    }

    #[test]
    fn completing_an_upgrade_moves_it() {
        let (bus, store) = store();
        let completed = record(&bus, Topic::UpgradeCompleted);
        store
            .update_state(json!({ "upgrades": { "available": [
                { "id": "cache", "name": "Token Cache", "cost": 500,
                  "description": "Reuse context", "benefit": "computingPower+10%" }
            ] } }))
            .unwrap();

        let upgrade = store.complete_upgrade("cache").unwrap();
        assert_eq!(upgrade.completed_at, Some(Utc::now().date_naive()));
        let state = store.get_state();
        assert!(state.upgrades.available.is_empty());
        assert_eq!(state.upgrades.completed.len(), 1);
        assert_eq!(
            state.development_history.last().unwrap().event,
            "Upgrade Completed: Token Cache"
        );
        assert_eq!(completed.lock().len(), 1);
    }

    #[test]
    fn unknown_upgrade_is_a_logged_no_op() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::StateUpdated);
        let before = store.get_state();
        assert!(store.complete_upgrade("missing").is_none());
        assert_eq!(store.get_state(), before);
        assert!(updates.lock().is_empty());
    }

    #[test]
    fn capability_updates_create_then_adjust() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::CapabilityUpdated);

        let created = store.update_capability("planning", None, None);
        assert_eq!(created.status, CapabilityStatus::Limited);
        assert_eq!(created.efficiency, 10.0);
        assert_eq!(created.description, "Ability related to planning");

        let adjusted = store.update_capability("planning", Some(CapabilityStatus::Active), Some(140.0));
        assert_eq!(adjusted.status, CapabilityStatus::Active);
        assert_eq!(adjusted.efficiency, 100.0);
        assert_eq!(updates.lock().len(), 2);
    }

    #[test]
    fn manual_bonuses_report_each_outcome() {
        let (bus, store) = store();
        let updates = record(&bus, Topic::StateUpdated);

        let outcomes = store.apply_bonuses(&["computing+10%", "influence+5", "bogus+1", "nope"]);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], BonusOutcome::Applied { to, .. } if to == 1100.0));
        assert_eq!(outcomes[1], BonusOutcome::NotNumeric);
        assert_eq!(outcomes[2], BonusOutcome::UnknownAlias);
        assert_eq!(updates.lock().len(), 1);

        assert!(store.apply_bonuses::<&str>(&[]).is_empty());
        assert_eq!(updates.lock().len(), 1);
    }

    #[test]
    fn load_falls_back_to_default_and_reads_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let initialized = record(&bus, Topic::StateInitialized);

        let missing = MetaStore::load(bus.clone(), dir.path().join("absent.json"));
        assert_eq!(missing.get_state().meta.version, "0.1.0");

        let mut persisted = MetaState::default();
        persisted.meta.version = "0.4.2".into();
        let path = dir.path().join("GAMESTATE.json");
        std::fs::write(&path, serde_json::to_string(&persisted).unwrap()).unwrap();
        let loaded = MetaStore::load(bus.clone(), &path);
        assert_eq!(loaded.get_state().meta.version, "0.4.2");

        let mut legacy = MetaState::default();
        legacy.resources.get_mut("funding").unwrap().current = Quantity::label("Abstract");
        let legacy_path = dir.path().join("legacy.json");
        std::fs::write(&legacy_path, serde_json::to_string(&legacy).unwrap()).unwrap();
        let migrated = MetaStore::load(bus.clone(), &legacy_path);
        assert_eq!(
            migrated.get_state().resources["funding"].current,
            Quantity::Amount(0.0)
        );

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(
            MetaStore::load(bus, &corrupt).get_state().meta.version,
            "0.1.0"
        );
        assert_eq!(initialized.lock().len(), 4);
    }
}
