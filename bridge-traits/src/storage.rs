//! Storage and File System Abstractions
//!
//! Provides a platform-agnostic trait for the file I/O the core performs:
//! locating bundled chart files and persisting cache snapshots.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - Sandboxed hosts: app-private cache directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn cache_data(fs: &dyn FileSystemAccess, data: &[u8]) -> Result<()> {
///     let cache_dir = fs.get_cache_directory().await?;
///     let file_path = cache_dir.join("data.bin");
///     fs.write_file(&file_path, data.to_vec().into()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// This directory is suitable for files that can be deleted by the
    /// system when storage is low. Implementations create it on demand.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, replacing any previous contents
    ///
    /// Implementations should make the replacement atomic where the platform
    /// allows it so readers never observe a half-written snapshot.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
