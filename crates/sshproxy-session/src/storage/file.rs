//! JSON file settings storage.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use sshproxy_core::{SavedSettings, SettingsStore, StorageError};

use super::credential::write_atomic;

/// Settings stored as a JSON document on disk.
///
/// The document holds the last session config, credential included, so it
/// belongs in a directory only the current user can read.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store settings at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store settings in the per-user config directory.
    #[must_use]
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("sshproxy").join("settings.json"))
    }

    #[must_use]
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn load(&self) -> Result<SavedSettings, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SavedSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, settings: &SavedSettings) -> Result<(), StorageError> {
        let content = serde_json::to_vec_pretty(settings)?;
        let path = self.path.clone();
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from);

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &content))
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sshproxy_core::{ProxyKind, SessionConfig};

    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load().await.unwrap(), SavedSettings::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("settings.json"));

        let settings = SavedSettings {
            config: Some(
                SessionConfig::new("example.org", "bg", "key").with_proxy_kind(ProxyKind::Http),
            ),
            proxy_running: true,
        };
        store.save(&settings).await.unwrap();

        let reopened = FileStore::new(store.path().clone());
        assert_eq!(reopened.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{").unwrap();

        let store = FileStore::new(path);
        assert!(matches!(store.load().await, Err(StorageError::Format(_))));
    }
}
