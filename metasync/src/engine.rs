//! The core engine that wires the whole metasync system together.

use crate::bus::EventBus;
use crate::common::SubscriptionId;
use crate::config::{MetaSyncConfig, SourceConfig};
use crate::events::{MetaEvent, Topic};
use crate::reconciler::{
    MetricsAdapter, PollOutcome, PollerHandle, Reconciler, RepositoryAdapter, UsageAdapter,
};
use crate::singularity::TriggerEngine;
use crate::snapshot::{RepositorySnapshot, UsageSnapshot};
use crate::source::{HttpSource, SnapshotSource};
use crate::state::MetaState;
use crate::store::MetaStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Where a reconciler currently lives.
enum Slot<A: MetricsAdapter> {
    /// Owned by the engine, not polling.
    Idle(Reconciler<A>),
    /// Moved onto its own polling task.
    Running(PollerHandle<A>),
    /// Lost: its polling task panicked.
    Gone,
}

struct Poller<A: MetricsAdapter> {
    interval: Duration,
    slot: Slot<A>,
}

impl<A: MetricsAdapter> Poller<A> {
    fn new(reconciler: Reconciler<A>, interval: Duration) -> Self {
        Self {
            interval,
            slot: Slot::Idle(reconciler),
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running(_))
    }

    fn start(&mut self) {
        self.slot = match std::mem::replace(&mut self.slot, Slot::Gone) {
            Slot::Idle(reconciler) => Slot::Running(reconciler.spawn(self.interval)),
            other => other,
        };
    }

    /// Restarts the loop with its next poll one interval away.
    fn resume(&mut self) {
        self.slot = match std::mem::replace(&mut self.slot, Slot::Gone) {
            Slot::Idle(reconciler) => Slot::Running(reconciler.spawn_deferred(self.interval)),
            other => other,
        };
    }

    async fn stop(&mut self) {
        self.slot = match std::mem::replace(&mut self.slot, Slot::Gone) {
            Slot::Running(handle) => match handle.join().await {
                Some(reconciler) => Slot::Idle(reconciler),
                None => Slot::Gone,
            },
            other => other,
        };
    }

    /// Polls out of schedule, pausing the loop around the extra tick if needed.
    async fn poll_now(&mut self) -> Option<PollOutcome> {
        let was_running = self.is_running();
        self.stop().await;
        let outcome = match &mut self.slot {
            Slot::Idle(reconciler) => Some(reconciler.poll_once().await),
            _ => None,
        };
        if was_running {
            self.resume();
        }
        outcome
    }
}

/// The main metasync engine.
///
/// Holds the bus, the store, the trigger engine and one reconciler per enabled
/// metric source. Everything is built once in the constructor and shared by
/// handle; the reconcilers only start polling on `start` or `run`.
pub struct MetaSyncEngine {
    config: Arc<MetaSyncConfig>,
    bus: Arc<EventBus>,
    store: Arc<MetaStore>,
    triggers: Arc<TriggerEngine>,
    usage: Mutex<Option<Poller<UsageAdapter>>>,
    repository: Mutex<Option<Poller<RepositoryAdapter>>>,
}

impl MetaSyncEngine {
    /// Creates an engine with a fresh bus and HTTP sources for every enabled endpoint.
    pub fn new(config: MetaSyncConfig) -> Self {
        Self::with_bus(config, Arc::new(EventBus::new()))
    }

    /// Like `new`, but on a bus the caller may already have subscribed to.
    ///
    /// Subscribers registered this way also see `meta:state:initialized`.
    pub fn with_bus(config: MetaSyncConfig, bus: Arc<EventBus>) -> Self {
        let usage = http_source::<UsageSnapshot>(&config.usage);
        let repository = http_source::<RepositorySnapshot>(&config.repository);
        Self::with_sources(config, bus, usage, repository)
    }

    /// Builds the engine over arbitrary snapshot sources. `None` disables a source.
    pub fn with_sources(
        config: MetaSyncConfig,
        bus: Arc<EventBus>,
        usage: Option<Box<dyn SnapshotSource<UsageSnapshot>>>,
        repository: Option<Box<dyn SnapshotSource<RepositorySnapshot>>>,
    ) -> Self {
        let store = Arc::new(MetaStore::load(bus.clone(), &config.state_path));
        let triggers = Arc::new(TriggerEngine::new(store.clone()));

        let usage = usage.map(|source| {
            Poller::new(
                Reconciler::new(
                    UsageAdapter,
                    source,
                    bus.clone(),
                    store.clone(),
                    triggers.clone(),
                    config.fallback_seed,
                ),
                config.usage.poll_interval(),
            )
        });
        let repository = repository.map(|source| {
            Poller::new(
                Reconciler::new(
                    RepositoryAdapter,
                    source,
                    bus.clone(),
                    store.clone(),
                    triggers.clone(),
                    config.fallback_seed.wrapping_add(1),
                ),
                config.repository.poll_interval(),
            )
        });

        Self {
            config: Arc::new(config),
            bus,
            store,
            triggers,
            usage: Mutex::new(usage),
            repository: Mutex::new(repository),
        }
    }

    pub fn config(&self) -> &MetaSyncConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    pub fn triggers(&self) -> &Arc<TriggerEngine> {
        &self.triggers
    }

    /// Returns an isolated copy of the current meta-state.
    pub fn state(&self) -> MetaState {
        self.store.get_state()
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&MetaEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Starts every configured reconciler's polling loop. Already-running loops are left alone.
    pub async fn start(&self) {
        if let Some(poller) = self.usage.lock().await.as_mut() {
            poller.start();
        }
        if let Some(poller) = self.repository.lock().await.as_mut() {
            poller.start();
        }
        info!("{} v{} polling", crate::ENGINE_NAME, crate::VERSION);
    }

    /// Stops every polling loop and waits for them. Calling it again is a no-op.
    pub async fn stop(&self) {
        if let Some(poller) = self.usage.lock().await.as_mut() {
            poller.stop().await;
        }
        if let Some(poller) = self.repository.lock().await.as_mut() {
            poller.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        let usage = self.usage.lock().await.as_ref().is_some_and(Poller::is_running);
        let repository = self
            .repository
            .lock()
            .await
            .as_ref()
            .is_some_and(Poller::is_running);
        usage || repository
    }

    /// Runs one extra poll tick on every configured source.
    pub async fn poll_now(&self) -> Vec<PollOutcome> {
        let mut outcomes = Vec::new();
        if let Some(poller) = self.usage.lock().await.as_mut() {
            outcomes.extend(poller.poll_now().await);
        }
        if let Some(poller) = self.repository.lock().await.as_mut() {
            outcomes.extend(poller.poll_now().await);
        }
        outcomes
    }

    /// Runs the engine until a shutdown signal is received.
    ///
    /// This method will:
    /// 1. Start every configured polling loop.
    /// 2. Wait for a Ctrl+C signal.
    /// 3. Stop the loops and wait for them to finish their current tick.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("MetaSyncEngine starting up...");
        self.start().await;

        info!(
            "State file {}. Press Ctrl+C to shut down.",
            self.config.state_path.display()
        );
        let signal = tokio::signal::ctrl_c().await;

        info!("Shutdown signal received. Stopping reconcilers...");
        self.stop().await;
        if let Err(err) = signal {
            error!("Failed to listen for the shutdown signal: {}", err);
            return Err(err.into());
        }
        info!("MetaSyncEngine has shut down.");
        Ok(())
    }
}

fn http_source<S>(config: &SourceConfig) -> Option<Box<dyn SnapshotSource<S>>>
where
    S: serde::de::DeserializeOwned + Send + 'static,
{
    if !config.enabled {
        info!("Source {} disabled", config.endpoint);
        return None;
    }
    Some(Box::new(HttpSource::<S>::new(
        config.endpoint.clone(),
        config.request_timeout(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SourceKind;
    use crate::error::{MetaError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable;

    #[async_trait]
    impl<S: Send + 'static> SnapshotSource<S> for Unreachable {
        fn endpoint(&self) -> &str {
            "mock://unreachable"
        }

        async fn fetch(&self) -> Result<S> {
            Err(MetaError::transport("mock://unreachable", "connection refused"))
        }
    }

    fn config() -> (tempfile::TempDir, MetaSyncConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = MetaSyncConfig {
            state_path: dir.path().join("GAMESTATE.json"),
            ..Default::default()
        };
        (dir, config)
    }

    #[tokio::test]
    async fn disabled_sources_are_never_built() {
        let (_dir, mut config) = config();
        config.usage.enabled = false;
        config.repository.enabled = false;
        let engine = MetaSyncEngine::new(config);
        assert!(engine.poll_now().await.is_empty());
        engine.start().await;
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (_dir, config) = config();
        let engine = MetaSyncEngine::with_sources(
            config,
            Arc::new(EventBus::new()),
            Some(Box::new(Unreachable)),
            Some(Box::new(Unreachable)),
        );
        engine.start().await;
        engine.start().await;
        assert!(engine.is_running().await);
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn poll_now_while_running_does_not_add_a_tick() {
        let (_dir, config) = config();
        let bus = Arc::new(EventBus::new());
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        bus.subscribe(Topic::MetricsUpdated(SourceKind::Usage), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let engine =
            MetaSyncEngine::with_sources(config, bus, Some(Box::new(Unreachable)), None);

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        assert_eq!(engine.poll_now().await.len(), 1);
        assert!(engine.is_running().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        engine.stop().await;
    }

    #[tokio::test]
    async fn poll_now_falls_back_while_stopped() {
        let (_dir, config) = config();
        let engine = MetaSyncEngine::with_sources(
            config,
            Arc::new(EventBus::new()),
            Some(Box::new(Unreachable)),
            None,
        );
        let outcomes = engine.poll_now().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].synthetic);
        assert!(!engine.is_running().await);
        assert_ne!(
            engine.state().resources["computingPower"].current,
            MetaState::default().resources["computingPower"].current
        );
    }
}
