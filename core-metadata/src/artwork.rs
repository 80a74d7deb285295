//! Artwork Image Cache - fetch, decode, downsample and keep artwork in memory
//!
//! ## Overview
//!
//! [`ImageCache`] is the image side of chart presentation. Every URL moves
//! through `absent -> in flight -> cached | absent`:
//!
//! - Concurrent callers for the same URL share one spawned download, so N
//!   simultaneous `fetch` calls cost one network request.
//! - Downloads across all URLs share one throttle (default 6 at a time).
//! - Decoded images are downsampled to the requested edge length and kept in
//!   an LRU cache bounded by decoded size (`width * height * 4` bytes).
//! - Failures are logged and reported as `None`; nothing is cached for them.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::artwork::ImageCache;
//!
//! let images = ImageCache::new(http_client, &ImageCacheConfig::default());
//!
//! // Quick low-resolution image now, full size warming in the background
//! let thumb = images.fetch_small_then_full(&item.artwork_url, 120, 600).await;
//! ```

use crate::error::{MetadataError, Result};
use bridge_traits::http::{HttpClient, HttpRequest};
use core_runtime::config::ImageCacheConfig;
use futures::future::{BoxFuture, FutureExt, Shared};
use image::imageops::FilterType;
use image::DynamicImage;
use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Timeout for a single image download
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

static ARTWORK_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)x(\d+)(bb\.(jpg|png))").expect("artwork size pattern is valid")
});

type PendingImage = Shared<BoxFuture<'static, Option<Arc<DynamicImage>>>>;

/// Cache counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCacheStats {
    /// Lookups served from memory
    pub hits: u64,
    /// Lookups that had to join or start a download
    pub misses: u64,
    /// Images currently cached
    pub entries: usize,
    /// Decoded bytes currently cached
    pub total_cost: usize,
}

struct CachedImage {
    image: Arc<DynamicImage>,
    cost: usize,
}

struct CacheState {
    entries: LruCache<String, CachedImage>,
    total_cost: usize,
    in_flight: HashMap<String, PendingImage>,
}

impl CacheState {
    /// Insert `image`, evicting least recently used entries until the total
    /// fits `budget`. Images larger than the whole budget are not kept.
    fn insert(&mut self, url: String, image: Arc<DynamicImage>, budget: usize) {
        let cost = image_cost(&image);
        if cost > budget {
            debug!(url = %url, cost, budget, "Image exceeds cache budget; not caching");
            return;
        }

        if let Some(previous) = self.entries.pop(&url) {
            self.total_cost -= previous.cost;
        }

        while self.total_cost + cost > budget {
            match self.entries.pop_lru() {
                Some((evicted_url, evicted)) => {
                    self.total_cost -= evicted.cost;
                    debug!(url = %evicted_url, cost = evicted.cost, "Evicted image");
                }
                None => break,
            }
        }

        // `push` hands back the entry displaced by the count capacity, if any
        if let Some((_, displaced)) = self.entries.push(url, CachedImage { image, cost }) {
            self.total_cost -= displaced.cost;
        }
        self.total_cost += cost;
    }
}

struct ImageCacheInner {
    http_client: Arc<dyn HttpClient>,
    state: Mutex<CacheState>,
    downloads: Semaphore,
    cost_budget: usize,
    small_dimension: u32,
    full_dimension: u32,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// De-duplicating, throttled, cost-bounded artwork cache.
///
/// Cheap to clone; clones share the cache, the in-flight table and the
/// download throttle.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<ImageCacheInner>,
}

impl ImageCache {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &ImageCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.entry_capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(ImageCacheInner {
                http_client,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    total_cost: 0,
                    in_flight: HashMap::new(),
                }),
                downloads: Semaphore::new(config.max_concurrent_downloads.max(1)),
                cost_budget: config.cost_budget,
                small_dimension: config.small_dimension,
                full_dimension: config.full_dimension,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    /// Image for `url`, downsampled so neither edge exceeds `max_dimension`.
    ///
    /// Returns `None` when the download or decode fails. The cache is keyed
    /// by URL alone, so a later call with a different `max_dimension` gets
    /// the image at whatever size it was first decoded.
    pub async fn fetch(&self, url: &str, max_dimension: u32) -> Option<Arc<DynamicImage>> {
        let pending = {
            let mut state = self.inner.state.lock().await;

            if let Some(cached) = state.entries.get(url) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&cached.image));
            }
            self.inner.misses.fetch_add(1, Ordering::Relaxed);

            match state.in_flight.get(url) {
                Some(pending) => {
                    debug!(url = %url, "Joining in-flight image download");
                    pending.clone()
                }
                None => {
                    // The task needs the state lock to finish, so it cannot
                    // complete before it is registered below.
                    let inner = Arc::clone(&self.inner);
                    let key = url.to_string();
                    let task = tokio::spawn(async move { inner.load(key, max_dimension).await });

                    // `load` clears the in-flight entry itself unless the task dies
                    let inner = Arc::clone(&self.inner);
                    let key = url.to_string();
                    let pending = async move {
                        match task.await {
                            Ok(image) => image,
                            Err(e) => {
                                warn!(url = %key, error = %e, "Image task aborted");
                                inner.state.lock().await.in_flight.remove(&key);
                                None
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    state.in_flight.insert(url.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Fetch a small variant of `url` first and warm the full-size image in
    /// the background.
    ///
    /// The small variant rewrites every `NxNbb.jpg|png` token to
    /// `<small>x<small>bb.jpg`. Without such a token, or if the small fetch
    /// fails, the full image is fetched directly.
    pub async fn fetch_small_then_full(
        &self,
        url: &str,
        small: u32,
        full: u32,
    ) -> Option<Arc<DynamicImage>> {
        if let Some(small_url) = small_variant_url(url, small) {
            if let Some(image) = self.fetch(&small_url, small).await {
                let cache = self.clone();
                let full_url = url.to_string();
                tokio::spawn(async move {
                    cache.fetch(&full_url, full).await;
                });
                return Some(image);
            }
            debug!(url = %url, "Small variant unavailable; fetching full size");
        }

        self.fetch(url, full).await
    }

    /// [`fetch_small_then_full`](Self::fetch_small_then_full) with the
    /// configured edge lengths.
    pub async fn fetch_artwork(&self, url: &str) -> Option<Arc<DynamicImage>> {
        self.fetch_small_then_full(url, self.inner.small_dimension, self.inner.full_dimension)
            .await
    }

    pub async fn stats(&self) -> ImageCacheStats {
        let state = self.inner.state.lock().await;
        ImageCacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entries: state.entries.len(),
            total_cost: state.total_cost,
        }
    }

    /// Drop every cached image and reset the counters.
    ///
    /// Downloads already in flight still complete and cache their result.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.entries.clear();
        state.total_cost = 0;
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        debug!("Cleared image cache");
    }
}

impl ImageCacheInner {
    async fn load(&self, url: String, max_dimension: u32) -> Option<Arc<DynamicImage>> {
        let result = self.download_and_decode(&url, max_dimension).await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(&url);

        match result {
            Ok(image) => {
                let image = Arc::new(image);
                state.insert(url, Arc::clone(&image), self.cost_budget);
                Some(image)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Image fetch failed");
                None
            }
        }
    }

    async fn download_and_decode(&self, url: &str, max_dimension: u32) -> Result<DynamicImage> {
        let body = {
            let _permit = self
                .downloads
                .acquire()
                .await
                .map_err(|_| MetadataError::Network("download throttle closed".to_string()))?;

            let request = HttpRequest::get(url).timeout(DOWNLOAD_TIMEOUT);
            let response = self.http_client.execute(request).await?;
            if !response.is_success() {
                return Err(MetadataError::Network(format!("HTTP {}", response.status)));
            }
            response.body
        };

        tokio::task::spawn_blocking(move || decode_and_downsample(&body, max_dimension))
            .await
            .map_err(|e| MetadataError::ImageProcessing {
                message: format!("Decode task failed: {}", e),
            })?
    }
}

/// Decode `data` and shrink it so neither edge exceeds `max_dimension`.
/// Aspect ratio is preserved and smaller images are left as they are.
pub fn decode_and_downsample(data: &[u8], max_dimension: u32) -> Result<DynamicImage> {
    let image = image::load_from_memory(data).map_err(|e| MetadataError::ImageProcessing {
        message: format!("Failed to decode image: {}", e),
    })?;

    let max_dimension = max_dimension.max(1);
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return Ok(image);
    }

    Ok(image.resize(max_dimension, max_dimension, FilterType::Triangle))
}

/// Decoded size of an image in bytes, counted as RGBA.
pub fn image_cost(image: &DynamicImage) -> usize {
    image.width() as usize * image.height() as usize * 4
}

/// URL of the `small` x `small` JPEG variant of an artwork URL, or `None`
/// when the URL carries no `NxNbb.jpg|png` size token.
pub fn small_variant_url(url: &str, small: u32) -> Option<String> {
    if !ARTWORK_SIZE.is_match(url) {
        return None;
    }
    Some(
        ARTWORK_SIZE
            .replace_all(url, format!("{0}x{0}bb.jpg", small).as_str())
            .into_owned(),
    )
}
