//! Bridge configuration, loaded from TOML.

use anyhow::{Context, Result};
use cohost_render::ContextConfig;
use cohost_tasks::{SchedulerMode, WatchdogConfig, DEFAULT_THREAD_NAME};
use cohost_windows::CompositorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything [`crate::Bridge::start`] needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Dedicated events thread, or pumped by `Bridge::render`
    pub scheduler: SchedulerMode,
    /// Name of the dedicated events thread
    pub thread_name: String,
    /// How long terminate waits for the events thread to answer
    pub teardown_timeout_ms: u64,
    /// Log level for the simulator binary
    pub log_level: String,
    pub context: ContextConfig,
    pub compositor: CompositorConfig,
    /// Responsiveness watchdog, threaded mode only. Off when absent.
    pub watchdog: Option<WatchdogConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerMode::Threaded,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            teardown_timeout_ms: 5000,
            log_level: "info".to_string(),
            context: ContextConfig::default(),
            compositor: CompositorConfig::default(),
            watchdog: None,
        }
    }
}

impl BridgeConfig {
    /// Host drives the events loop from its render loop.
    pub fn cooperative() -> Self {
        Self {
            scheduler: SchedulerMode::Cooperative,
            ..Self::default()
        }
    }

    /// Dedicated events thread with the watchdog on.
    pub fn watched() -> Self {
        Self {
            watchdog: Some(WatchdogConfig::default()),
            ..Self::default()
        }
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Parse the TOML form. Unknown keys are rejected.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid bridge configuration")
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize bridge configuration")
    }
}
