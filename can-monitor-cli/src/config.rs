//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_monitor_core::{Bitrate, MonitorConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from monitor.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    pub replay: Option<ReplayConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(flatten)]
    pub monitor: MonitorConfig,
    /// Extra detection runs before giving up
    #[serde(default)]
    pub detection_retries: u32,
    /// Continue without a bus when detection fails
    #[serde(default = "default_true")]
    pub offline_on_failure: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            monitor: MonitorConfig::default(),
            detection_retries: 0,
            offline_on_failure: true,
        }
    }
}

fn default_channel() -> String {
    "PCAN_USBBUS1".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesConfig {
    /// JSON rule catalog
    pub file: Option<PathBuf>,
    /// Configuration to activate (default: first in the catalog)
    pub configuration: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayConfig {
    /// candump log to feed into the simulated bus
    pub file: PathBuf,
    /// Bit rate the simulated bus answers at
    #[serde(default = "default_bus_bitrate")]
    pub bus_bitrate: Bitrate,
    /// Honour the log's timestamps instead of queueing everything at once
    #[serde(default)]
    pub pace: bool,
}

fn default_bus_bitrate() -> Bitrate {
    Bitrate::K500
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Reject settings the monitor cannot run with
fn validate(config: &AppConfig) -> Result<()> {
    let monitor = &config.connection.monitor;
    if monitor.candidate_bitrates.is_empty() {
        anyhow::bail!("no candidate bit rates listed");
    }
    if monitor.detection_timeout_ms == 0 {
        anyhow::bail!("detection_timeout_ms must be at least 1");
    }
    if monitor.read_timeout_ms == 0 {
        anyhow::bail!("read_timeout_ms must be at least 1");
    }
    Ok(())
}
