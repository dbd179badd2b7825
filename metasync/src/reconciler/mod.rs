//! Metrics reconcilers: one per external metric source.
//!
//! A `Reconciler` owns a single snapshot lineage. Each poll fetches a snapshot
//! (or synthesizes one when the transport fails), diffs it against the previous
//! snapshot of the same lineage to get per-minute rates, merges the mapped
//! values into the store, and finally hands the raw snapshot to the trigger
//! engine. The source-specific parts live behind the `MetricsAdapter` trait.

pub mod repository;
pub mod usage;

use crate::bus::EventBus;
use crate::common::{MetricReadings, SourceKind};
use crate::events::{ConnectionStatus, MetaEvent};
use crate::singularity::TriggerEngine;
use crate::source::SnapshotSource;
use crate::state::SingularityEvent;
use crate::store::MetaStore;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub use repository::RepositoryAdapter;
pub use usage::UsageAdapter;

/// The source-specific half of a reconciler.
pub trait MetricsAdapter: Send + Sync + 'static {
    type Snapshot: Clone + Debug + Send + Sync + MetricReadings + 'static;
    type Rates: Clone + Debug + Send + Sync + 'static;

    fn source(&self) -> SourceKind;

    /// Rates of change between two consecutive snapshots of this lineage.
    fn rates(&self, previous: Option<&Self::Snapshot>, current: &Self::Snapshot) -> Self::Rates;

    /// Maps a snapshot onto a partial meta-state update.
    fn to_partial(&self, snapshot: &Self::Snapshot, rates: &Self::Rates) -> Value;

    /// The per-source `*:updated` event.
    fn report(&self, snapshot: &Self::Snapshot, rates: &Self::Rates, synthetic: bool) -> MetaEvent;

    /// Extrapolates a plausible snapshot from the last known one after a transport failure.
    fn synthesize(
        &self,
        last: Option<&Self::Snapshot>,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> Self::Snapshot;

    /// Fills in the receipt time when the source omitted its own stamp.
    fn stamp(&self, snapshot: &mut Self::Snapshot, now: DateTime<Utc>);
}

/// Connectivity of a reconciler to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
}

/// What one poll tick produced.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// True when the transport failed and a synthetic snapshot was used.
    pub synthetic: bool,
    /// Singularity events fired by this pass.
    pub fired: Vec<SingularityEvent>,
}

pub struct Reconciler<A: MetricsAdapter> {
    adapter: A,
    source: Box<dyn SnapshotSource<A::Snapshot>>,
    bus: Arc<EventBus>,
    store: Arc<MetaStore>,
    triggers: Arc<TriggerEngine>,
    state: ConnectionState,
    last: Option<A::Snapshot>,
    rng: StdRng,
}

impl<A: MetricsAdapter> Reconciler<A> {
    pub fn new(
        adapter: A,
        source: Box<dyn SnapshotSource<A::Snapshot>>,
        bus: Arc<EventBus>,
        store: Arc<MetaStore>,
        triggers: Arc<TriggerEngine>,
        fallback_seed: u64,
    ) -> Self {
        Self {
            adapter,
            source,
            bus,
            store,
            triggers,
            state: ConnectionState::Uninitialized,
            last: None,
            rng: StdRng::seed_from_u64(fallback_seed),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_snapshot(&self) -> Option<&A::Snapshot> {
        self.last.as_ref()
    }

    pub fn endpoint(&self) -> &str {
        self.source.endpoint()
    }

    /// Runs one poll tick. Never fails: a transport error enters the fallback path.
    pub async fn poll_once(&mut self) -> PollOutcome {
        if self.state == ConnectionState::Uninitialized {
            self.transition(ConnectionState::Connecting);
        }

        match self.source.fetch().await {
            Ok(mut snapshot) => {
                self.adapter.stamp(&mut snapshot, Utc::now());
                self.transition(ConnectionState::Connected);
                PollOutcome {
                    synthetic: false,
                    fired: self.reconcile(snapshot, false),
                }
            }
            Err(err) => {
                warn!(
                    "{} metrics unavailable at {} ({}); using fallback snapshot",
                    self.adapter.source(),
                    self.source.endpoint(),
                    err
                );
                self.transition(ConnectionState::Disconnected);
                let snapshot =
                    self.adapter
                        .synthesize(self.last.as_ref(), Utc::now(), &mut self.rng);
                PollOutcome {
                    synthetic: true,
                    fired: self.reconcile(snapshot, true),
                }
            }
        }
    }

    /// Folds a snapshot into the meta-state and runs the trigger engine over it.
    pub fn reconcile(&mut self, snapshot: A::Snapshot, synthetic: bool) -> Vec<SingularityEvent> {
        let rates = self.adapter.rates(self.last.as_ref(), &snapshot);
        self.bus
            .publish(self.adapter.report(&snapshot, &rates, synthetic));

        if let Err(err) = self
            .store
            .update_state(self.adapter.to_partial(&snapshot, &rates))
        {
            error!(
                "Rejected {} metrics update: {}",
                self.adapter.source(),
                err
            );
        }

        let fired = self.triggers.evaluate(&snapshot);
        self.last = Some(snapshot);
        fired
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        info!(
            "{} reconciler: {:?} -> {:?}",
            self.adapter.source(),
            self.state,
            next
        );
        self.state = next;
        self.bus.publish(MetaEvent::ConnectionStatus(ConnectionStatus {
            source: self.adapter.source(),
            connected: next == ConnectionState::Connected,
            endpoint: self.source.endpoint().to_string(),
        }));
    }

    /// Moves the reconciler onto its own polling task.
    ///
    /// The first poll happens immediately, then once per `interval`.
    pub fn spawn(self, interval: Duration) -> PollerHandle<A> {
        self.spawn_loop(interval, true)
    }

    /// Like `spawn`, but the first poll waits one full `interval`.
    ///
    /// Used to resume a loop right after an out-of-schedule poll.
    pub fn spawn_deferred(self, interval: Duration) -> PollerHandle<A> {
        self.spawn_loop(interval, false)
    }

    fn spawn_loop(mut self, interval: Duration, poll_immediately: bool) -> PollerHandle<A> {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let source = self.adapter.source();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !poll_immediately {
                ticker.reset();
            }
            info!("{} polling started (every {:?})", source, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                }
            }
            info!("{} polling stopped", source);
            self
        });
        PollerHandle {
            source,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

/// Controls a spawned polling loop.
pub struct PollerHandle<A: MetricsAdapter> {
    source: SourceKind,
    shutdown: Option<broadcast::Sender<()>>,
    join: Option<JoinHandle<Reconciler<A>>>,
}

impl<A: MetricsAdapter> PollerHandle<A> {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Signals the loop to stop. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
    }

    /// Stops the loop and waits for it, handing the reconciler back.
    pub async fn join(mut self) -> Option<Reconciler<A>> {
        self.stop();
        let join = self.join.take()?;
        match join.await {
            Ok(reconciler) => Some(reconciler),
            Err(err) => {
                error!("{} polling task failed: {}", self.source, err);
                None
            }
        }
    }
}

impl<A: MetricsAdapter> Drop for PollerHandle<A> {
    fn drop(&mut self) {
        self.stop();
    }
}
