//! Parameters of a single tunnel session.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH server port.
pub const DEFAULT_SSH_PORT: &str = "22";

/// Default local port the engine listens on.
pub const DEFAULT_LOCAL_PORT: u16 = 1081;

/// Kind of proxy the engine serves on the local port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// SOCKS5 proxy.
    #[default]
    Socks5,
    /// HTTP proxy (plain requests and CONNECT).
    Http,
}

impl ProxyKind {
    /// Name understood by the engine's `-proxyType` flag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
            Self::Http => "http",
        }
    }

    /// Human-readable label used in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Socks5 => "SOCKS5",
            Self::Http => "HTTP",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid SSH port: {0}")]
    InvalidPort(String),
    #[error("Invalid local port: {0}")]
    InvalidLocalPort(u16),
}

/// Immutable parameters of one tunnel session.
///
/// Created from a `Start` command and owned by the supervisor until the
/// session is torn down.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// SSH server host.
    pub host: String,
    /// SSH server port, kept as text the way front ends submit it.
    #[serde(default = "default_ssh_port")]
    pub port: String,
    /// SSH user.
    pub user: String,
    /// Optional SSH password, passed through to the engine.
    #[serde(default)]
    pub password: String,
    /// Private key material.
    #[serde(default)]
    pub credential: String,
    /// Proxy protocol served locally.
    #[serde(default)]
    pub proxy_kind: ProxyKind,
    /// Local listening port of the engine.
    #[serde(default = "default_local_port")]
    pub local_port: u16,
}

fn default_ssh_port() -> String {
    DEFAULT_SSH_PORT.to_string()
}

const fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

impl SessionConfig {
    /// Create a configuration with the default ports and a SOCKS5 proxy.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            user: user.into(),
            password: String::new(),
            credential: credential.into(),
            proxy_kind: ProxyKind::default(),
            local_port: DEFAULT_LOCAL_PORT,
        }
    }

    /// Override the SSH port.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Set the SSH password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the proxy kind.
    #[must_use]
    pub const fn with_proxy_kind(mut self, proxy_kind: ProxyKind) -> Self {
        self.proxy_kind = proxy_kind;
        self
    }

    /// Set the local listening port.
    #[must_use]
    pub const fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    /// `host:port` of the SSH server.
    #[must_use]
    pub fn ssh_address(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port.trim())
    }

    /// Check the fields the engine cannot do without.
    ///
    /// The credential is not checked here; staging rejects empty material.
    ///
    /// # Errors
    /// Returns the first missing or malformed field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        if self.port.trim().is_empty() {
            return Err(ConfigError::MissingField("port"));
        }
        match self.port.trim().parse::<u16>() {
            Ok(0) | Err(_) => return Err(ConfigError::InvalidPort(self.port.clone())),
            Ok(_) => {}
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingField("user"));
        }
        if self.local_port == 0 {
            return Err(ConfigError::InvalidLocalPort(self.local_port));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("credential", &redacted(&self.credential))
            .field("proxy_kind", &self.proxy_kind)
            .field("local_port", &self.local_port)
            .finish()
    }
}

const fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}
