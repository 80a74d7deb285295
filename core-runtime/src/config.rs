//! # Core Configuration Module
//!
//! Provides configuration management for the chart enrichment core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every bridge and tunable the core needs. It enforces
//! fail-fast validation so a misconfigured endpoint or a zero-sized budget is
//! reported at startup rather than on the first refresh.
//!
//! ## Bridges
//!
//! - `HttpClient` - chart download, metadata search and artwork fetches
//!   (desktop default: reqwest)
//! - `FileSystemAccess` - metadata cache snapshot (desktop default: tokio fs)
//! - `Clock` - TTL bookkeeping (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop defaults for
//! `HttpClient` and `FileSystemAccess` are injected automatically if not
//! provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RankingDefaults};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .ranking(
//!         RankingDefaults::default()
//!             .with_remote_url("https://example.com/top10.json")
//!             .with_cap(10),
//!     )
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, RetryPolicy, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default search endpoint for track metadata lookups.
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://itunes.apple.com/search";

/// Default snapshot file name for the metadata cache.
pub const DEFAULT_METADATA_CACHE_FILE: &str = "metadata_cache.json";

/// Default local chart file name.
pub const DEFAULT_LOCAL_CHART_FILE: &str = "kworb_top10.json";

/// Core configuration.
///
/// Holds all bridges and settings required to initialize the core. Use
/// [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory holding the metadata cache snapshot
    pub cache_dir: PathBuf,

    /// HTTP client for chart, search and artwork requests
    pub http_client: Arc<dyn HttpClient>,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Time source used for cache expiry
    pub clock: Arc<dyn Clock>,

    /// Metadata lookup cache settings
    pub metadata: MetadataCacheConfig,

    /// Search API settings
    pub search: SearchApiConfig,

    /// Image cache settings
    pub images: ImageCacheConfig,

    /// Defaults applied to chart refreshes
    pub ranking: RankingDefaults,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("clock", &"Clock { ... }")
            .field("metadata", &self.metadata)
            .field("search", &self.search)
            .field("images", &self.images)
            .field("ranking", &self.ranking)
            .finish()
    }
}

/// Settings for the persistent metadata lookup cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCacheConfig {
    /// Entries older than this are treated as absent. Default: 24 hours.
    pub ttl: Duration,

    /// Quiet window after the last mutation before the snapshot is written.
    /// Default: 1 second.
    pub persist_debounce: Duration,

    /// Snapshot file name inside the cache directory.
    pub file_name: String,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            persist_debounce: Duration::from_secs(1),
            file_name: DEFAULT_METADATA_CACHE_FILE.to_string(),
        }
    }
}

impl MetadataCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_persist_debounce(mut self, debounce: Duration) -> Self {
        self.persist_debounce = debounce;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::Config(
                "Metadata cache TTL must be greater than zero".to_string(),
            ));
        }

        if self.file_name.trim().is_empty() {
            return Err(Error::Config(
                "Metadata cache file name cannot be empty".to_string(),
            ));
        }

        if self.file_name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "Metadata cache file name must not contain path separators: {}",
                self.file_name
            )));
        }

        Ok(())
    }
}

/// Settings for the track metadata search API.
///
/// # Example
///
/// ```no_run
/// use core_runtime::config::SearchApiConfig;
/// use std::time::Duration;
///
/// let config = SearchApiConfig::default()
///     .with_max_attempts(5)
///     .with_base_retry_delay(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchApiConfig {
    /// Search endpoint; must be https.
    pub endpoint: String,

    /// Edge length, in pixels, artwork URLs are rewritten to. Default: 600.
    pub artwork_dimension: u32,

    /// Total attempts per lookup, including the first. Default: 3.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each following retry.
    /// Default: 500ms.
    pub base_retry_delay: Duration,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            artwork_dimension: 600,
            max_attempts: 3,
            base_retry_delay: Duration::from_millis(500),
        }
    }
}

impl SearchApiConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_artwork_dimension(mut self, dimension: u32) -> Self {
        self.artwork_dimension = dimension;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_retry_delay,
            ..RetryPolicy::default()
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        require_https("Search endpoint", &self.endpoint)?;

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Search max attempts must be at least 1".to_string(),
            ));
        }

        if self.artwork_dimension == 0 {
            return Err(Error::Config(
                "Artwork dimension must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings for the in-memory image cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheConfig {
    /// Total decoded size (width * height * 4 bytes) kept in memory.
    /// Default: 50 MiB.
    pub cost_budget: usize,

    /// Downloads allowed in flight at once. Default: 6.
    pub max_concurrent_downloads: usize,

    /// Upper bound on cached entries regardless of cost. Default: 512.
    pub entry_capacity: usize,

    /// Edge length of the quick first image. Default: 120.
    pub small_dimension: u32,

    /// Edge length of the full image. Default: 600.
    pub full_dimension: u32,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            cost_budget: 50 * 1024 * 1024,
            max_concurrent_downloads: 6,
            entry_capacity: 512,
            small_dimension: 120,
            full_dimension: 600,
        }
    }
}

impl ImageCacheConfig {
    pub fn with_cost_budget(mut self, bytes: usize) -> Self {
        self.cost_budget = bytes;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.max_concurrent_downloads = limit;
        self
    }

    pub fn with_entry_capacity(mut self, capacity: usize) -> Self {
        self.entry_capacity = capacity;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cost_budget == 0 {
            return Err(Error::Config(
                "Image cache cost budget must be greater than zero".to_string(),
            ));
        }

        if self.max_concurrent_downloads == 0 {
            return Err(Error::Config(
                "Image download limit must be at least 1".to_string(),
            ));
        }

        if self.entry_capacity == 0 {
            return Err(Error::Config(
                "Image cache entry capacity must be at least 1".to_string(),
            ));
        }

        if self.small_dimension == 0 || self.full_dimension == 0 {
            return Err(Error::Config(
                "Image dimensions must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Defaults applied to every chart refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingDefaults {
    /// Remote chart URL; when unset refreshes read the local file.
    pub remote_url: Option<String>,

    /// Enrichment requests in flight at once. Default: 6.
    pub concurrency_limit: usize,

    /// Keep only the first `cap` entries by rank.
    pub cap: Option<usize>,

    /// Largest remote chart body accepted. Default: 2,000,000 bytes.
    pub max_remote_bytes: usize,

    /// Timeout for the remote chart download. Default: 12 seconds.
    pub remote_timeout: Duration,

    /// File name probed for under `docs/` and resource directories.
    pub local_file_name: String,

    /// Extra directories probed after the built-in candidates.
    pub resource_dirs: Vec<PathBuf>,
}

impl Default for RankingDefaults {
    fn default() -> Self {
        Self {
            remote_url: None,
            concurrency_limit: 6,
            cap: None,
            max_remote_bytes: 2_000_000,
            remote_timeout: Duration::from_secs(12),
            local_file_name: DEFAULT_LOCAL_CHART_FILE.to_string(),
            resource_dirs: Vec::new(),
        }
    }
}

impl RankingDefaults {
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn with_max_remote_bytes(mut self, bytes: usize) -> Self {
        self.max_remote_bytes = bytes;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_local_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.local_file_name = file_name.into();
        self
    }

    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dirs.push(dir.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote_url {
            require_https("Remote chart URL", url)?;
        }

        if self.concurrency_limit == 0 {
            return Err(Error::Config(
                "Ranking concurrency limit must be at least 1".to_string(),
            ));
        }

        if self.max_remote_bytes == 0 {
            return Err(Error::Config(
                "Remote chart size limit must be greater than zero".to_string(),
            ));
        }

        if self.local_file_name.trim().is_empty() {
            return Err(Error::Config(
                "Local chart file name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn require_https(what: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ({}): {}", what, raw, e)))?;

    if url.scheme() != "https" {
        return Err(Error::Config(format!(
            "{} must use https, got '{}'",
            what,
            url.scheme()
        )));
    }

    Ok(())
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Cache directory is not empty
    /// - Every sub-configuration passes its own validation
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        self.metadata.validate()?;
        self.search.validate()?;
        self.images.validate()?;
        self.ranking.validate()?;

        Ok(())
    }

    /// Full path of the metadata cache snapshot.
    pub fn metadata_cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.metadata.file_name)
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn missing_capability(capability: &str, what: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the default. \
             Other hosts: inject an implementation through the builder.",
            capability, what
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(missing_capability(
        "HttpClient",
        "chart downloads and metadata lookups",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    Ok(Arc::new(TokioFileSystem::with_cache_directory(
        cache_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(missing_capability(
        "FileSystemAccess",
        "metadata cache persistence",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and produce the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
    metadata: Option<MetadataCacheConfig>,
    search: Option<SearchApiConfig>,
    images: Option<ImageCacheConfig>,
    ranking: Option<RankingDefaults>,
}

impl CoreConfigBuilder {
    /// Sets the cache directory (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .cache_dir("/path/to/cache");
    /// ```
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the tokio-based implementation rooted at the cache
    /// directory is used when the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the clock used for cache expiry. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the metadata cache settings.
    pub fn metadata(mut self, config: MetadataCacheConfig) -> Self {
        self.metadata = Some(config);
        self
    }

    /// Sets the search API settings.
    pub fn search(mut self, config: SearchApiConfig) -> Self {
        self.search = Some(config);
        self
    }

    /// Sets the image cache settings.
    pub fn images(mut self, config: ImageCacheConfig) -> Self {
        self.images = Some(config);
        self
    }

    /// Sets the defaults applied to chart refreshes.
    pub fn ranking(mut self, config: RankingDefaults) -> Self {
        self.ranking = Some(config);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the cache directory is missing or a value is
    ///   invalid (non-https endpoint, zero budget or limit)
    /// - [`Error::CapabilityMissing`] when a bridge was not injected and no
    ///   platform default is compiled in
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir)?,
        };

        let config = CoreConfig {
            cache_dir,
            http_client,
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            metadata: self.metadata.unwrap_or_default(),
            search: self.search.unwrap_or_default(),
            images: self.images.unwrap_or_default(),
            ranking: self.ranking.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
