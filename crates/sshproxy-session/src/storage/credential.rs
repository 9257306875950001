//! File-backed credential staging.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sshproxy_core::{CredentialStager, StagingError};

/// Default staged key file name.
const KEY_FILE_NAME: &str = "private_key.pem";

/// Stages private keys at a fixed path in the application's data directory.
#[derive(Debug, Clone)]
pub struct FileStager {
    dir: PathBuf,
}

impl FileStager {
    /// Stage keys inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stage keys in the per-user data directory.
    #[must_use]
    pub fn default_location() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("sshproxy"))
    }

    /// Path the key is staged at.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(KEY_FILE_NAME)
    }
}

#[async_trait]
impl CredentialStager for FileStager {
    async fn stage(&self, material: &[u8]) -> Result<PathBuf, StagingError> {
        if material.is_empty() {
            return Err(StagingError::EmptyMaterial);
        }

        let target = self.path();
        let dir = self.dir.clone();
        let bytes = material.to_vec();
        let staged = target.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &staged, &bytes))
            .await
            .map_err(io::Error::other)??;

        tracing::debug!(path = %target.display(), "Credential staged");
        Ok(target)
    }

    async fn discard(&self) -> Result<(), StagingError> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => {
                tracing::debug!("Staged credential removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `target`.
pub(crate) fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = target.with_file_name(tmp_name);

    let result = (|| {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
