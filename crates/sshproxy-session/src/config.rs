//! Supervisor configuration.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine log stream endpoint.
pub const DEFAULT_LOG_ENDPOINT: &str = "http://127.0.0.1:1792/logs";

/// Prefix of payload lines on the engine log stream.
pub const DEFAULT_LOG_MARKER: &str = "data: ";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing and endpoint settings for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay between liveness probes.
    pub health_interval_ms: u64,
    /// Connect timeout of a single probe.
    pub probe_timeout_ms: u64,
    /// Host the engine's local listener binds to.
    pub probe_host: IpAddr,
    /// Engine log stream URL; `None` disables the relay.
    pub log_endpoint: Option<String>,
    /// Prefix that marks payload lines on the log stream.
    pub log_marker: String,
    /// Approximate bytes of event history kept for late subscribers.
    pub history_bytes: usize,
    /// Remove the staged key file when a session ends.
    pub erase_credential_on_stop: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            probe_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            log_endpoint: Some(DEFAULT_LOG_ENDPOINT.to_string()),
            log_marker: DEFAULT_LOG_MARKER.to_string(),
            history_bytes: 16 * 1024 * 1024,
            erase_credential_on_stop: true,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a JSON file. Omitted keys keep their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Override the probe interval.
    #[must_use]
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval_ms = millis(interval);
        self
    }

    /// Override the probe connect timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = millis(timeout);
        self
    }

    /// Set or disable the engine log stream endpoint.
    #[must_use]
    pub fn with_log_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.log_endpoint = endpoint;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
