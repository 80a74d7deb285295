//! Metadata Lookup Cache - TTL-bounded, persisted search results
//!
//! Maps a normalized `(title, artist)` key to the last search result for it.
//! Records older than the configured TTL are treated as absent and removed on
//! read. Every mutation schedules a debounced write of the whole map to a JSON
//! snapshot through [`FileSystemAccess`]; a burst of mutations inside the quiet
//! window produces a single write.
//!
//! Snapshot layout:
//!
//! ```text
//! {
//!   "espresso::sabrina carpenter": {
//!     "payload": { "trackName": "Espresso", ... },
//!     "insertedAt": "2024-04-11T12:00:00Z"
//!   }
//! }
//! ```

use crate::error::{MetadataError, Result};
use crate::models::TrackMetadata;
use bridge_traits::{Clock, FileSystemAccess};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::config::MetadataCacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A cached search result and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub payload: TrackMetadata,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    records: HashMap<String, CacheRecord>,
    /// Bumped on every mutation; a pending write only runs if it still
    /// matches when its quiet window ends.
    generation: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    /// Held across snapshot + write so writes land in mutation order.
    write_lock: Mutex<()>,
    file_system: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    snapshot_path: PathBuf,
    ttl: Duration,
    debounce: Duration,
}

/// Persistent TTL cache of search results.
///
/// Cheap to clone; clones share the same map and snapshot.
#[derive(Clone)]
pub struct MetadataLookupCache {
    inner: Arc<CacheInner>,
}

impl MetadataLookupCache {
    /// Open the cache, loading a prior snapshot from `snapshot_path` if one
    /// exists.
    ///
    /// A missing or unreadable snapshot yields an empty cache; the problem is
    /// logged rather than returned.
    pub async fn open(
        file_system: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        snapshot_path: PathBuf,
        config: &MetadataCacheConfig,
    ) -> Self {
        let records = match load_snapshot(file_system.as_ref(), &snapshot_path).await {
            Ok(Some(records)) => {
                info!(entries = records.len(), "Loaded metadata cache snapshot");
                records
            }
            Ok(None) => {
                debug!(path = ?snapshot_path, "No metadata cache snapshot yet");
                HashMap::new()
            }
            Err(e) => {
                warn!(path = ?snapshot_path, error = %e, "Ignoring unreadable metadata cache snapshot");
                HashMap::new()
            }
        };

        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    records,
                    generation: 0,
                }),
                write_lock: Mutex::new(()),
                file_system,
                clock,
                snapshot_path,
                ttl: config.ttl,
                debounce: config.persist_debounce,
            }),
        }
    }

    /// Cache key for a title/artist pair: each part trimmed and lowercased,
    /// joined by `"::"`.
    pub fn normalize_key(title: &str, artist: &str) -> String {
        format!(
            "{}::{}",
            title.trim().to_lowercase(),
            artist.trim().to_lowercase()
        )
    }

    /// Look up a fresh record.
    ///
    /// An expired record is removed and reported absent, and its removal is
    /// scheduled for persistence.
    pub async fn get(&self, title: &str, artist: &str) -> Option<TrackMetadata> {
        let key = Self::normalize_key(title, artist);
        let mut state = self.inner.state.lock().await;

        let inserted_at = state.records.get(&key)?.inserted_at;
        if self.inner.is_expired(inserted_at) {
            state.records.remove(&key);
            debug!(key = %key, "Metadata cache entry expired");
            self.schedule_persist(&mut state);
            return None;
        }

        state.records.get(&key).map(|record| record.payload.clone())
    }

    /// Insert or overwrite the record for this pair, stamped with the
    /// clock's current time.
    pub async fn set(&self, title: &str, artist: &str, payload: TrackMetadata) {
        let key = Self::normalize_key(title, artist);
        let record = CacheRecord {
            payload,
            inserted_at: self.inner.clock.now(),
        };

        let mut state = self.inner.state.lock().await;
        state.records.insert(key, record);
        self.schedule_persist(&mut state);
    }

    /// Number of records held, including any not yet found to be expired.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every record and schedule persistence of the empty map.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.records.clear();
        self.schedule_persist(&mut state);
        info!("Cleared metadata cache");
    }

    /// Write the snapshot now, bypassing the debounce.
    pub async fn flush(&self) -> Result<()> {
        self.inner.persist().await
    }

    /// Snapshot location.
    pub fn snapshot_path(&self) -> &Path {
        &self.inner.snapshot_path
    }

    fn schedule_persist(&self, state: &mut CacheState) {
        state.generation += 1;
        let generation = state.generation;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;

            if inner.state.lock().await.generation != generation {
                // A later mutation owns the write.
                return;
            }

            if let Err(e) = inner.persist().await {
                warn!(path = ?inner.snapshot_path, error = %e, "Failed to persist metadata cache");
            }
        });
    }
}

impl CacheInner {
    fn is_expired(&self, inserted_at: DateTime<Utc>) -> bool {
        // A record stamped in the future (clock moved back) counts as fresh
        match (self.clock.now() - inserted_at).to_std() {
            Ok(age) => age > self.ttl,
            Err(_) => false,
        }
    }

    async fn persist(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;

        let (json, entries) = {
            let state = self.state.lock().await;
            let json = serde_json::to_vec(&state.records)
                .map_err(|e| MetadataError::CacheIo(format!("Failed to encode snapshot: {}", e)))?;
            (json, state.records.len())
        };

        self.file_system
            .write_file(&self.snapshot_path, Bytes::from(json))
            .await?;

        debug!(entries, path = ?self.snapshot_path, "Persisted metadata cache");
        Ok(())
    }
}

async fn load_snapshot(
    file_system: &dyn FileSystemAccess,
    path: &Path,
) -> Result<Option<HashMap<String, CacheRecord>>> {
    if !file_system.exists(path).await? {
        return Ok(None);
    }

    let data = file_system.read_file(path).await?;
    let records = serde_json::from_slice(&data)
        .map_err(|e| MetadataError::CacheIo(format!("Failed to decode snapshot: {}", e)))?;
    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// In-memory file system that counts writes.
    #[derive(Default)]
    struct MemoryFs {
        files: StdMutex<HashMap<PathBuf, Bytes>>,
        writes: AtomicUsize,
        fail_writes: bool,
    }

    #[async_trait]
    impl FileSystemAccess for MemoryFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/cache"))
        }

        async fn exists(&self, path: &Path) -> BridgeResult<bool> {
            Ok(self.files.lock().unwrap().contains_key(path))
        }

        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }

        async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| BridgeError::OperationFailed("missing".to_string()))
        }

        async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(BridgeError::OperationFailed("disk full".to_string()));
            }
            self.files.lock().unwrap().insert(path.to_path_buf(), data);
            Ok(())
        }

        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    fn snapshot() -> PathBuf {
        PathBuf::from("/cache/metadata_cache.json")
    }

    fn payload(name: &str) -> TrackMetadata {
        TrackMetadata {
            track_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    async fn open_with(fs: Arc<MemoryFs>, clock: Arc<ManualClock>) -> MetadataLookupCache {
        MetadataLookupCache::open(fs, clock, snapshot(), &MetadataCacheConfig::default()).await
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(
            MetadataLookupCache::normalize_key("  Espresso ", "Sabrina CARPENTER\n"),
            "espresso::sabrina carpenter"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_case_and_whitespace_insensitive() {
        let cache = open_with(Arc::default(), Arc::new(ManualClock::default())).await;

        cache.set("Espresso", "Sabrina Carpenter", payload("Espresso")).await;

        assert_eq!(
            cache.get(" espresso", "SABRINA CARPENTER ").await,
            Some(payload("Espresso"))
        );
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = open_with(Arc::default(), clock.clone()).await;

        cache.set("Song", "Singer", payload("Song")).await;

        clock.advance(chrono::Duration::hours(24));
        assert!(cache.get("Song", "Singer").await.is_some(), "exactly TTL is still fresh");

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("Song", "Singer").await.is_none());
        assert!(cache.is_empty().await, "expired entry is removed on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_sets_coalesces_into_one_write() {
        let fs = Arc::new(MemoryFs::default());
        let cache = open_with(fs.clone(), Arc::new(ManualClock::default())).await;

        for i in 0..5 {
            cache.set(&format!("Song {}", i), "Singer", payload("x")).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(fs.writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fs.writes.load(Ordering::SeqCst), 1);

        let stored = fs.files.lock().unwrap().get(&snapshot()).cloned().unwrap();
        let records: HashMap<String, CacheRecord> = serde_json::from_slice(&stored).unwrap();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_swallowed() {
        let fs = Arc::new(MemoryFs {
            fail_writes: true,
            ..Default::default()
        });
        let cache = open_with(fs.clone(), Arc::new(ManualClock::default())).await;

        cache.set("Song", "Singer", payload("Song")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fs.writes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("Song", "Singer").await, Some(payload("Song")));
        assert!(cache.flush().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_snapshot_opens_empty() {
        let fs = Arc::new(MemoryFs::default());
        fs.files
            .lock()
            .unwrap()
            .insert(snapshot(), Bytes::from_static(b"{not json"));

        let cache = open_with(fs, Arc::new(ManualClock::default())).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_uses_wire_field_names() {
        let fs = Arc::new(MemoryFs::default());
        let cache = open_with(fs.clone(), Arc::new(ManualClock::default())).await;

        cache.set("Song", "Singer", payload("Song")).await;
        cache.flush().await.unwrap();

        let stored = fs.files.lock().unwrap().get(&snapshot()).cloned().unwrap();
        let text = String::from_utf8(stored.to_vec()).unwrap();
        assert!(text.contains("\"song::singer\""));
        assert!(text.contains("\"insertedAt\""));
        assert!(text.contains("\"payload\""));
        assert!(text.contains("\"trackName\":\"Song\""));
    }
}
