//! Engine process configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default engine command line.
pub const DEFAULT_ENGINE_COMMAND: &str = "ssh2socks5";

/// Settings for `ProcessEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine command line; split like a shell would.
    pub command: String,
    /// Extra arguments placed before the session flags.
    pub extra_args: Vec<String>,
    /// How long a freshly spawned engine must stay up to count as started.
    pub startup_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            extra_args: Vec::new(),
            startup_grace_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Config for a specific command line.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Override the start-up grace period.
    #[must_use]
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub const fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"command":"/opt/engine"}"#).unwrap();
        assert_eq!(config.command, "/opt/engine");
        assert_eq!(config.startup_grace(), Duration::from_millis(500));
        assert!(config.extra_args.is_empty());
    }
}
