use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::processor::MAX_RETRIES;

/// Largest staleness window a `chrono::Duration` can hold in milliseconds.
const MAX_STALE_AFTER_SECS: u64 = (i64::MAX / 1000) as u64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: String,
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub stale_after_secs: u64,
    pub periodic_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Health endpoint probed for reachability. Defaults to `<base_url>/health`.
    pub probe_url: Option<String>,
    /// Address used for the route lookup that tells whether any interface is up.
    pub route_probe_addr: String,
    pub interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            api: ApiConfig::default(),
            sync: SyncConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            auth_token: None,
            timeout_secs: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            stale_after_secs: 300,
            periodic_interval_secs: 60,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            route_probe_addr: "1.1.1.1:53".to_string(),
            interval_secs: 5,
            probe_timeout_secs: 5,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Config {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("QUEST_SYNC_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(url) = lookup("QUEST_SYNC_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("QUEST_SYNC_AUTH_TOKEN") {
            self.api.auth_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url is empty".to_string()));
        }
        if self.sync.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_retries must be at least 1".to_string(),
            ));
        }
        if self.api.timeout_secs == 0
            || self.sync.periodic_interval_secs == 0
            || self.monitor.interval_secs == 0
            || self.monitor.probe_timeout_secs == 0
        {
            return Err(ConfigError::Invalid(
                "timeouts and intervals must be positive".to_string(),
            ));
        }
        if self.sync.stale_after_secs > MAX_STALE_AFTER_SECS {
            return Err(ConfigError::Invalid(format!(
                "sync.stale_after_secs must be at most {MAX_STALE_AFTER_SECS}"
            )));
        }
        self.route_probe_addr()?;
        Ok(())
    }

    pub fn probe_url(&self) -> String {
        match &self.monitor.probe_url {
            Some(url) => url.clone(),
            None => format!("{}/health", self.api.base_url.trim_end_matches('/')),
        }
    }

    pub fn route_probe_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.monitor.route_probe_addr.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "monitor.route_probe_addr is not a socket address: {}",
                self.monitor.route_probe_addr
            ))
        })
    }
}
