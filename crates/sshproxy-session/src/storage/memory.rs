//! In-memory settings storage.

use std::sync::RwLock;

use async_trait::async_trait;
use sshproxy_core::{SavedSettings, SettingsStore, StorageError};

/// In-memory storage implementation.
///
/// Useful for development and tests.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: RwLock<SavedSettings>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with settings.
    #[must_use]
    pub fn with_settings(settings: SavedSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<SavedSettings, StorageError> {
        Ok(self
            .settings
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .clone())
    }

    async fn save(&self, settings: &SavedSettings) -> Result<(), StorageError> {
        *self
            .settings
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))? = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sshproxy_core::SessionConfig;

    use super::*;

    #[tokio::test]
    async fn test_load_defaults_then_save() {
        let store = MemoryStore::new();
        assert_eq!(store.load().await.unwrap(), SavedSettings::default());

        let settings = SavedSettings {
            config: Some(SessionConfig::new("h", "u", "k")),
            proxy_running: true,
        };
        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await.unwrap(), settings);
    }
}
