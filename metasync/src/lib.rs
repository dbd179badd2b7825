//! # Metasync
//!
//! The meta-state synchronization engine behind the singularity idle game.
//!
//! Metasync keeps a single, persistent meta-game state in step with real
//! development activity. External metric sources are polled on a timer, their
//! counters are folded into the state, and crossing a fixed threshold fires a
//! one-shot "singularity" event whose bonuses feed back into the game.
//!
//! ## Core Concepts
//!
//! - **EventBus**: A synchronous, topic-keyed publish/subscribe hub. Every state
//!   change is announced on it, and a panicking handler never takes its siblings down.
//! - **MetaStore**: The only owner of the `MetaState` tree. Partial updates are
//!   deep-merged: mappings recurse, everything else replaces.
//! - **Bonuses**: Compact strings such as `"data+20%"` or `"metarecursion+1"`
//!   that adjust numeric values in the state.
//! - **TriggerEngine**: Evaluates the fixed rule table against each fresh
//!   snapshot and fires every rule at most once per state lineage.
//! - **Reconcilers**: One per metric source. Each polls, falls back to a
//!   synthetic snapshot when the source is unreachable, and publishes its
//!   connectivity as it changes.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use metasync::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Load the configuration (missing file means defaults).
//!     let config = MetaSyncConfig::load("metasync.toml")?;
//!
//!     // 2. Create the engine.
//!     let engine = MetaSyncEngine::new(config);
//!
//!     // 3. Subscribe before the first poll.
//!     engine.subscribe(Topic::SingularityComplete, |event| {
//!         println!("Singularity! {:?}", event);
//!     });
//!
//!     // 4. Run until Ctrl+C.
//!     engine.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Metasync Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bonus;
pub mod bus;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod singularity;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod store;

/// A prelude module for easy importing of the most common Metasync types.
pub mod prelude {
    pub use crate::bonus::{Bonus, BonusOutcome, BonusTarget};
    pub use crate::bus::EventBus;
    pub use crate::common::{Metric, MetricReadings, SourceKind, SubscriptionId};
    pub use crate::config::{MetaSyncConfig, SourceConfig};
    pub use crate::engine::MetaSyncEngine;
    pub use crate::error::{MetaError, Result};
    pub use crate::events::{MetaEvent, Topic};
    pub use crate::reconciler::{ConnectionState, Reconciler, RepositoryAdapter, UsageAdapter};
    pub use crate::singularity::{SingularityRule, TriggerEngine, DEFAULT_RULES};
    pub use crate::snapshot::{RepositorySnapshot, UsageSnapshot};
    pub use crate::source::{HttpSource, SnapshotSource};
    pub use crate::state::{CapabilityStatus, MetaState, Quantity};
    pub use crate::store::{MetaStore, SingularityTrigger};
}
