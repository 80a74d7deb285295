//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const APP_DIR_NAME: &str = "chart-core";

/// Tokio-based file system implementation
///
/// Provides async file I/O using `tokio::fs` rooted at the platform cache
/// directory (`~/Library/Caches`, `%LOCALAPPDATA%`, `$XDG_CACHE_HOME`).
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the default cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);

        Self { cache_dir }
    }

    /// Create a new file system accessor with a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }
        Ok(self.cache_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        // Write to a sibling temp file, then rename over the target.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        fs::write(&tmp_path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Self::map_io_error(e));
        }

        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(Self::map_io_error)? {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}
