//! Seams between the supervisor and its collaborators.

use std::{
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ProxyKind, SessionConfig};

/// Arguments of a single engine start call.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    /// Path of the staged private key.
    pub key_path: PathBuf,
    pub local_port: u16,
    pub proxy_kind: ProxyKind,
}

impl EngineRequest {
    /// Build a request from a session config and its staged key.
    #[must_use]
    pub fn new(config: &SessionConfig, key_path: PathBuf) -> Self {
        Self {
            host: config.host.trim().to_string(),
            port: config.port.trim().to_string(),
            user: config.user.trim().to_string(),
            password: config.password.clone(),
            key_path,
            local_port: config.local_port,
            proxy_kind: config.proxy_kind,
        }
    }
}

impl fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "<empty>" } else { "<redacted>" })
            .field("key_path", &self.key_path)
            .field("local_port", &self.local_port)
            .field("proxy_kind", &self.proxy_kind)
            .finish()
    }
}

/// Error reported across the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Stop was called with no tunnel running. Benign.
    #[error("Engine is not running")]
    NotRunning,
    #[error("Engine is already running")]
    AlreadyRunning,
    #[error("Engine executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("{0}")]
    StartFailed(String),
    #[error("{0}")]
    StopFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this is the benign "stop while not running" outcome.
    #[must_use]
    pub const fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }
}

/// Boundary to the external tunnel engine.
///
/// Implementations wrapping blocking native calls must move them off the
/// async runtime (for example with `tokio::task::spawn_blocking`).
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Start the tunnel and its local listener.
    async fn start(&self, request: &EngineRequest) -> Result<(), EngineError>;

    /// Stop the tunnel. Must be safe to call when nothing is running.
    async fn stop(&self) -> Result<(), EngineError>;
}

/// Credential staging error.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Credential is empty")]
    EmptyMaterial,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Materializes private-key material as a file the engine can read.
#[async_trait]
pub trait CredentialStager: Send + Sync {
    /// Write `material` to the staging path and return that path.
    ///
    /// The file is replaced atomically; a reader never sees partial content.
    async fn stage(&self, material: &[u8]) -> Result<PathBuf, StagingError>;

    /// Remove the staged file. Removing a missing file succeeds.
    async fn discard(&self) -> Result<(), StagingError>;
}

/// Wake/keep-alive resource held while a session is active.
///
/// Both operations are idempotent.
pub trait KeepAlive: Send + Sync {
    fn acquire(&self);
    fn release(&self);
    fn is_held(&self) -> bool;
}

/// In-process keep-alive flag.
///
/// Stands in for a platform wake lock and records whether it is held.
#[derive(Debug, Default)]
pub struct WakeFlag {
    held: AtomicBool,
}

impl WakeFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeepAlive for WakeFlag {
    fn acquire(&self) {
        if !self.held.swap(true, Ordering::AcqRel) {
            tracing::debug!("Keep-alive acquired");
        }
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::AcqRel) {
            tracing::debug!("Keep-alive released");
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Front-end settings persisted across process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSettings {
    /// Last submitted session configuration.
    #[serde(default)]
    pub config: Option<SessionConfig>,
    /// Whether the proxy was running when last recorded.
    #[serde(default)]
    pub proxy_running: bool,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for settings storage backends.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load saved settings. Missing settings load as the default.
    async fn load(&self) -> Result<SavedSettings, StorageError>;

    /// Replace the saved settings.
    async fn save(&self, settings: &SavedSettings) -> Result<(), StorageError>;
}
