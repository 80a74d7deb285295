//! End-to-end tests for the RankingCore façade
//!
//! The core is assembled from a real `CoreConfig` with in-memory HTTP and
//! filesystem bridges, then driven through refresh, lookup and shutdown.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_metadata::{ChartEntry, EnrichmentStatus};
use core_ranking::RefreshOutcome;
use core_runtime::config::{CoreConfig, RankingDefaults};
use core_runtime::events::{CoreEvent, RankingEvent};
use core_service::{CoreError, RankingCore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const CHART_URL: &str = "https://charts.example.com/top.json";
const SNAPSHOT: &str = "/cache/metadata_cache.json";

#[derive(Default)]
struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Bytes>>,
}

impl MemoryFs {
    fn read(&self, path: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(Path::new(path)).cloned()
    }
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
            .ok_or_else(|| BridgeError::OperationFailed(format!("missing {}", path.display())))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().unwrap().insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Serves the remote chart and answers every search with one track.
#[derive(Default)]
struct FakeApi {
    searches: AtomicUsize,
}

#[async_trait]
impl HttpClient for FakeApi {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.url == CHART_URL {
            let chart = serde_json::json!([
                {"rank": 2, "title": "Birds", "artist": "Billie"},
                {"rank": 1, "title": "Espresso", "artist": "Sabrina"},
                {"rank": 3, "title": "Lunch", "artist": "Billie"}
            ]);
            return Ok(HttpResponse::new(200, chart.to_string()));
        }

        self.searches.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "resultCount": 1,
            "results": [{
                "trackName": "Track",
                "artworkUrl100": "https://img.example.com/a/100x100bb.jpg",
                "previewUrl": "https://audio.example.com/a.m4a",
                "collectionName": "Album"
            }]
        });
        Ok(HttpResponse::new(200, body.to_string()))
    }
}

fn config(api: Arc<FakeApi>, fs: Arc<MemoryFs>) -> CoreConfig {
    CoreConfig::builder()
        .cache_dir("/cache")
        .http_client(api)
        .file_system(fs)
        .ranking(RankingDefaults::default().with_remote_url(CHART_URL))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_refresh_applies_enriched_ranking() {
    let api = Arc::new(FakeApi::default());
    let core = RankingCore::new(config(api.clone(), Arc::new(MemoryFs::default())))
        .await
        .unwrap();
    let mut events = core.subscribe();

    assert_eq!(core.refresh().await, RefreshOutcome::Applied(3));

    let state = core.snapshot().await;
    let ranks: Vec<u32> = state.items.iter().map(|item| item.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(state.items[0].title, "Espresso");
    assert!(state
        .status_by_rank
        .values()
        .all(|status| *status == EnrichmentStatus::Success));
    assert!(!state.is_refreshing);
    assert_eq!(api.searches.load(Ordering::SeqCst), 3);

    match events.recv().await.unwrap() {
        CoreEvent::Ranking(RankingEvent::RefreshStarted { .. }) => {}
        other => panic!("expected RefreshStarted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_persists_and_reopen_reuses_cache() {
    let api = Arc::new(FakeApi::default());
    let fs = Arc::new(MemoryFs::default());

    let core = RankingCore::new(config(api.clone(), fs.clone())).await.unwrap();
    core.refresh().await;
    core.shutdown().await.unwrap();

    let snapshot: serde_json::Value =
        serde_json::from_slice(&fs.read(SNAPSHOT).unwrap()).unwrap();
    assert_eq!(snapshot.as_object().unwrap().len(), 3);
    assert!(snapshot.get("espresso::sabrina").is_some());

    let reopened = RankingCore::new(config(api.clone(), fs)).await.unwrap();
    let metadata = reopened
        .lookup(&ChartEntry::new(1, "  Espresso ", "SABRINA"))
        .await
        .unwrap();

    assert_eq!(metadata.collection_name.as_deref(), Some("Album"));
    assert_eq!(api.searches.load(Ordering::SeqCst), 3);
}

#[test]
fn test_invalid_config_maps_to_core_error() {
    let err = CoreConfig::builder()
        .cache_dir("/cache")
        .http_client(Arc::new(FakeApi::default()))
        .file_system(Arc::new(MemoryFs::default()))
        .ranking(RankingDefaults::default().with_concurrency_limit(0))
        .build()
        .unwrap_err();

    assert!(matches!(CoreError::from(err), CoreError::Config(_)));
}
