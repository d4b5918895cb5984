//! Feeder configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Feeder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeederConfig {
    /// Name reported in structured events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port serving registration, health and metrics endpoints
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Reconciliation interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Discovery file watched by the metrics collector
    #[serde(default = "default_sd_file_path")]
    pub sd_file_path: String,

    /// Emitted lists buffered between the reconciler and the file writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_listen_port() -> u16 {
    8082
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_sd_file_path() -> String {
    "/opt/file_sd/targets.json".to_string()
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            listen_port: default_listen_port(),
            refresh_interval_secs: default_refresh_interval(),
            sd_file_path: default_sd_file_path(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl FeederConfig {
    /// Load configuration from an optional `sd-feeder` config file,
    /// overridden by `FEEDER_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("sd-feeder").required(false))
            .add_source(config::Environment::with_prefix("FEEDER"))
            .build()?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        let feeder: FeederConfig = config
            .try_deserialize()
            .context("Invalid feeder configuration")?;
        feeder.validate()?;
        Ok(feeder)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than zero");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        if self.sd_file_path.trim().is_empty() {
            bail!("sd_file_path must not be empty");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
