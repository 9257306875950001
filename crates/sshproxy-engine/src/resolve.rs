//! Engine executable resolution.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute, or relative with a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_name_is_unresolved() {
        assert!(resolve_executable_path("  ").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_unresolved() {
        assert!(
            resolve_executable_path("/definitely/not/here/ssh2socks5")
                .await
                .is_none()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolves_from_path() {
        let found = resolve_executable_path("sh").await.unwrap();
        assert!(found.is_absolute());
    }
}
