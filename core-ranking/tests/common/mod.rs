//! Shared fakes for the ranking integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::SystemClock;
use bytes::Bytes;
use core_metadata::{MetadataEnricher, MetadataLookupCache};
use core_ranking::{EnrichmentCoordinator, SourceListProvider};
use core_runtime::config::{RankingDefaults, SearchApiConfig};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SEARCH_ENDPOINT: &str = "https://itunes.apple.com/search";

/// In-memory file tree. Directories exist implicitly above every file.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Bytes>>,
}

impl MemoryFs {
    pub fn with_files(files: Vec<(&str, &str)>) -> Self {
        let fs = Self::default();
        for (path, content) in files {
            fs.add(path, content);
        }
        fs
    }

    pub fn add(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), Bytes::from(content.to_string()));
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/cache"))
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        let files = self.files.lock().unwrap();
        Ok(files.keys().any(|file| file.starts_with(path)))
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
            .ok_or_else(|| BridgeError::OperationFailed(format!("no such file: {}", path.display())))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().unwrap().insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        let children: HashSet<PathBuf> = files
            .keys()
            .flat_map(|file| file.ancestors())
            .filter(|ancestor| ancestor.parent() == Some(path))
            .map(Path::to_path_buf)
            .collect();

        if children.is_empty() {
            return Err(BridgeError::OperationFailed(format!(
                "not a directory: {}",
                path.display()
            )));
        }
        Ok(children.into_iter().collect())
    }
}

/// Serves a remote chart and answers search queries.
///
/// Every search returns one track derived from the query term, except terms
/// containing one of `empty_terms`, which get an empty result list.
pub struct ChartApi {
    charts: HashMap<String, Bytes>,
    empty_terms: Vec<String>,
    search_delay: Duration,
    requests: Mutex<Vec<String>>,
    active_searches: AtomicUsize,
    peak_searches: AtomicUsize,
}

impl ChartApi {
    pub fn new() -> Self {
        Self {
            charts: HashMap::new(),
            empty_terms: Vec::new(),
            search_delay: Duration::from_millis(5),
            requests: Mutex::new(Vec::new()),
            active_searches: AtomicUsize::new(0),
            peak_searches: AtomicUsize::new(0),
        }
    }

    pub fn with_chart(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.charts.insert(url.to_string(), body.into());
        self
    }

    pub fn with_empty_term(mut self, term: &str) -> Self {
        self.empty_terms.push(term.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn search_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.starts_with(SEARCH_ENDPOINT))
            .count()
    }

    pub fn peak_searches(&self) -> usize {
        self.peak_searches.load(Ordering::SeqCst)
    }

    async fn search(&self, url: &str) -> HttpResponse {
        let active = self.active_searches.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_searches.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.search_delay).await;
        self.active_searches.fetch_sub(1, Ordering::SeqCst);

        let term = url
            .split("term=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap_or_default()
            .to_string();

        if self.empty_terms.iter().any(|empty| term.contains(empty.as_str())) {
            return HttpResponse::new(200, r#"{"resultCount":0,"results":[]}"#);
        }

        let body = serde_json::json!({
            "resultCount": 1,
            "results": [{
                "trackName": term,
                "artistName": "Search Artist",
                "artworkUrl100": format!("https://img.example.com/{}/100x100bb.jpg", term),
                "previewUrl": format!("https://audio.example.com/{}.m4a", term),
                "releaseDate": "2024-04-11T12:00:00Z",
                "collectionName": "Search Album"
            }]
        });
        HttpResponse::new(200, body.to_string())
    }
}

#[async_trait]
impl HttpClient for ChartApi {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.url.clone());

        if request.url.starts_with(SEARCH_ENDPOINT) {
            return Ok(self.search(&request.url).await);
        }

        Ok(match self.charts.get(&request.url) {
            Some(body) => HttpResponse::new(200, body.clone()),
            None => HttpResponse::new(404, "not found"),
        })
    }
}

pub fn chart_json(entries: &[(u32, &str, &str)]) -> String {
    let rows: Vec<serde_json::Value> = entries
        .iter()
        .map(|(rank, title, artist)| {
            serde_json::json!({ "rank": rank, "title": title, "artist": artist })
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

pub fn source_provider(
    api: Arc<dyn HttpClient>,
    fs: Arc<MemoryFs>,
    defaults: &RankingDefaults,
) -> SourceListProvider {
    SourceListProvider::new(api, fs, defaults).with_search_roots(
        Some(PathBuf::from("/work/project")),
        Some(PathBuf::from("/opt/app/bin")),
    )
}

pub async fn coordinator(api: Arc<ChartApi>, fs: Arc<MemoryFs>) -> EnrichmentCoordinator {
    let cache = MetadataLookupCache::open(
        fs.clone(),
        Arc::new(SystemClock),
        PathBuf::from("/cache/metadata_cache.json"),
        &Default::default(),
    )
    .await;
    let enricher = MetadataEnricher::new(api.clone(), cache, &SearchApiConfig::default());
    let source = source_provider(api, fs, &RankingDefaults::default());

    EnrichmentCoordinator::new(Arc::new(source), Arc::new(enricher))
}
