//! Crash-safe file writes.

use crate::types::{AppError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Temp-file path used while `path` is being written.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `content` to `path` via temp file, fsync and rename.
///
/// Readers of `path` see either the previous file or the complete new one,
/// never a truncated write.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            AppError::Persistence(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, content)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to write {}: {}", tmp.display(), e)))?;

    // Sync off the async runtime
    let tmp_clone = tmp.clone();
    match tokio::task::spawn_blocking(move || {
        std::fs::File::open(&tmp_clone).and_then(|file| file.sync_all())
    })
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to sync temp file to disk"),
        Err(e) => warn!(error = %e, "Failed to sync temp file to disk"),
    }

    fs::rename(&tmp, path).await.map_err(|e| {
        AppError::Persistence(format!("Failed to rename into {}: {}", path.display(), e))
    })?;

    debug!(path = %path.display(), "Atomic write completed");
    Ok(())
}

/// Removes a leftover temp file from an interrupted write of `path`.
pub async fn recover_interrupted_write(path: &Path) {
    let tmp = tmp_path(path);
    if fs::try_exists(&tmp).await.unwrap_or(false) {
        debug!(path = %tmp.display(), "Removing interrupted write");
        let _ = fs::remove_file(&tmp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_path_keeps_extension() {
        let tmp = tmp_path(Path::new("/data/session.json"));
        assert_eq!(tmp, PathBuf::from("/data/session.json.tmp"));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_recover_interrupted_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(tmp_path(&path), "partial").unwrap();

        recover_interrupted_write(&path).await;
        assert!(!tmp_path(&path).exists());
    }
}
