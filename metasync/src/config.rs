//! Defines all configuration structures for the metasync engine.
//!
//! These structs are deserialized with `serde` through the `config` crate: an
//! optional TOML file layered under `METASYNC__*` environment variables. Every
//! field has a default, so an empty or missing file yields a working setup.

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The top-level configuration for the `MetaSyncEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaSyncConfig {
    /// Where the persisted meta-state snapshot lives.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// The development/usage metrics endpoint.
    #[serde(default = "default_usage_source")]
    pub usage: SourceConfig,

    /// The source-control metrics endpoint.
    #[serde(default = "default_repository_source")]
    pub repository: SourceConfig,

    /// Seeds the RNG behind synthetic fallback snapshots.
    #[serde(default = "default_fallback_seed")]
    pub fallback_seed: u64,
}

/// Polling settings for one external metric source.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub endpoint: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Disabled sources are never polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl MetaSyncConfig {
    /// Loads the configuration from an optional TOML file plus the environment.
    ///
    /// `METASYNC__USAGE__ENDPOINT=...` overrides `usage.endpoint`, and so on.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("METASYNC").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

// --- Default value functions for serde ---

fn default_state_path() -> PathBuf {
    PathBuf::from("GAMESTATE.json")
}

fn default_usage_source() -> SourceConfig {
    SourceConfig {
        endpoint: "http://localhost:3000/claude-metrics".to_string(),
        poll_interval_secs: 10,
        request_timeout_secs: default_request_timeout_secs(),
        enabled: true,
    }
}

fn default_repository_source() -> SourceConfig {
    SourceConfig {
        endpoint: "http://localhost:3000/github-metrics".to_string(),
        poll_interval_secs: 60,
        request_timeout_secs: default_request_timeout_secs(),
        enabled: true,
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_enabled() -> bool {
    true
}

fn default_fallback_seed() -> u64 {
    0x5EED_1E55
}

impl Default for MetaSyncConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            usage: default_usage_source(),
            repository: default_repository_source(),
            fallback_seed: default_fallback_seed(),
        }
    }
}
