//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (`SLUICE_*`)
//! 2. Values deserialized from an embedding application's config file
//! 3. Defaults

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Tunables for the pipeline engine
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Replay buffer capacity per run, in events (default: 1000)
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    /// How long finished runs are retained before eviction (default: 300 s)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Per-event delivery timeout for a subscriber connection (default: 10 s)
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,

    /// Optional per-step deadline; exceeding it fails the step (default: none)
    #[serde(default)]
    pub step_deadline_secs: Option<u64>,
}

fn default_event_buffer_capacity() -> usize {
    1000
}
fn default_retention_secs() -> u64 {
    300
}
fn default_delivery_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_capacity: default_event_buffer_capacity(),
            retention_secs: default_retention_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            step_deadline_secs: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with `SLUICE_*` environment overrides applied.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_u64("SLUICE_EVENT_BUFFER_CAPACITY") {
            config.event_buffer_capacity = value as usize;
        }
        if let Some(value) = env_u64("SLUICE_RETENTION_SECS") {
            config.retention_secs = value;
        }
        if let Some(value) = env_u64("SLUICE_DELIVERY_TIMEOUT_SECS") {
            config.delivery_timeout_secs = value;
        }
        if let Some(value) = env_u64("SLUICE_STEP_DEADLINE_SECS") {
            config.step_deadline_secs = Some(value);
        }

        config
    }

    /// Retention window for finished runs
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Per-event delivery timeout for subscriber connections
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    /// Per-step deadline, if configured
    pub fn step_deadline(&self) -> Option<Duration> {
        self.step_deadline_secs.map(Duration::from_secs)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(%key, value = %raw, "Ignoring unparseable configuration override");
            None
        }
    }
}
