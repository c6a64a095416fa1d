use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::monitor::error::ConfigError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily`, anything else never rotates
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "pos-monitor.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// Engine timing. Every duration is independently configurable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lets the transfer indexer catch up with a freshly announced block
    #[serde(default = "default_block_scan_delay_ms")]
    pub block_scan_delay_ms: u64,
    /// Upper bound on `pageKey` pages followed per transfer query
    #[serde(default = "default_transfer_page_limit")]
    pub transfer_page_limit: usize,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_block_scan_delay_ms() -> u64 {
    2_000
}

fn default_transfer_page_limit() -> usize {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            block_scan_delay_ms: default_block_scan_delay_ms(),
            transfer_page_limit: default_transfer_page_limit(),
        }
    }
}

impl MonitorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Never zero: a zero period would make the tick timer panic.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn block_scan_delay(&self) -> Duration {
        Duration::from_millis(self.block_scan_delay_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub native_symbol: String,
    pub rpc_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_pending_filter")]
    pub pending_filter: bool,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_pending_filter() -> bool {
    true
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

impl ChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.monitor.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "monitor.max_reconnect_attempts must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate chain_id {}",
                    chain.chain_id
                )));
            }
            if chain.rpc_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "chain {} ({}) has an empty rpc_url",
                    chain.chain_id, chain.name
                )));
            }
        }

        Ok(())
    }
}
