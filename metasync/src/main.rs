use anyhow::Result;
use metasync::prelude::*;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. `RUST_LOG` overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the configuration; a missing file means defaults.
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "metasync.toml".to_string());
    let config = MetaSyncConfig::load(&config_path)?;
    info!("Configuration loaded from {}", config_path);

    // 3. Subscribe before the engine loads its state so nothing is missed.
    let bus = Arc::new(EventBus::new());
    register_event_loggers(&bus);

    // 4. Create and run the engine until Ctrl+C.
    let engine = MetaSyncEngine::with_bus(config, bus);
    engine.run().await?;

    Ok(())
}

/// Logs the events an operator cares about.
fn register_event_loggers(bus: &EventBus) {
    bus.subscribe(Topic::StateInitialized, |event| {
        if let MetaEvent::StateInitialized(state) = event {
            info!(
                "[STATE] => v{} in phase '{}', {} singularity event(s) on record",
                state.meta.version,
                state.meta.phase,
                state.singularity_events.len()
            );
        }
    });

    bus.subscribe(Topic::SingularityComplete, |event| {
        if let MetaEvent::SingularityComplete(singularity) = event {
            info!(
                "[SINGULARITY] => {} ({}), bonuses: {}",
                singularity.name,
                singularity.id,
                singularity.bonuses.join(", ")
            );
        }
    });

    bus.subscribe(Topic::UpgradeCompleted, |event| {
        if let MetaEvent::UpgradeCompleted(upgrade) = event {
            info!("[UPGRADE] => {} completed", upgrade.name);
        }
    });

    for source in [SourceKind::Usage, SourceKind::Repository] {
        bus.subscribe(Topic::ConnectionStatus(source), |event| {
            if let MetaEvent::ConnectionStatus(status) = event {
                if status.connected {
                    info!("[{}] => connected to {}", status.source, status.endpoint);
                } else {
                    warn!("[{}] => disconnected from {}", status.source, status.endpoint);
                }
            }
        });
    }
}
