//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into the chart pipeline: the
//! persistent metadata cache, the search enricher, the chart source, the
//! enrichment coordinator, the refresh session and the artwork image cache.
//! Desktop apps typically enable the `desktop-shims` feature so the HTTP
//! client and filesystem default to the `bridge-desktop` adapters.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::RankingCore;
//!
//! let config = CoreConfig::builder().cache_dir("/tmp/charts").build()?;
//! let core = RankingCore::new(config).await?;
//!
//! core.refresh().await;
//! for item in core.snapshot().await.items {
//!     println!("{} {} - {}", item.rank, item.title, item.artist);
//! }
//! core.shutdown().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_metadata::{ChartEntry, ImageCache, MetadataEnricher, MetadataLookupCache, TrackMetadata};
use core_ranking::{
    EnrichmentCoordinator, LoadRequest, RankingLoader, RankingSession, RankingState,
    RefreshOutcome, SourceListProvider,
};
use core_runtime::config::{CoreConfig, RankingDefaults};
use core_runtime::events::{EventBus, EventStream};
use tracing::{info, warn};

/// Primary façade exposed to host applications.
///
/// Owns one instance of every cache, so all refreshes and image loads made
/// through it share the same lookup cache, download throttle and image
/// budget.
pub struct RankingCore {
    metadata_cache: MetadataLookupCache,
    enricher: Arc<MetadataEnricher>,
    images: ImageCache,
    session: RankingSession,
    event_bus: EventBus,
    defaults: RankingDefaults,
}

impl RankingCore {
    /// Build the pipeline from `config`.
    ///
    /// Creates the cache directory and loads any prior metadata snapshot.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        let (metadata_cache, enricher) = open_metadata(&config).await?;

        let source = Arc::new(SourceListProvider::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.file_system),
            &config.ranking,
        ));
        let loader: Arc<dyn RankingLoader> =
            Arc::new(EnrichmentCoordinator::new(source, Arc::clone(&enricher)));

        Ok(Self::assemble(config, metadata_cache, enricher, loader))
    }

    /// Like [`new`](Self::new) but refreshes go through `loader` instead of
    /// the built-in coordinator.
    pub async fn with_loader(config: CoreConfig, loader: Arc<dyn RankingLoader>) -> Result<Self> {
        let (metadata_cache, enricher) = open_metadata(&config).await?;
        Ok(Self::assemble(config, metadata_cache, enricher, loader))
    }

    fn assemble(
        config: CoreConfig,
        metadata_cache: MetadataLookupCache,
        enricher: Arc<MetadataEnricher>,
        loader: Arc<dyn RankingLoader>,
    ) -> Self {
        let event_bus = EventBus::default();
        let images = ImageCache::new(Arc::clone(&config.http_client), &config.images);
        let session = RankingSession::new(loader, event_bus.clone());

        info!(cache_dir = ?config.cache_dir, "Ranking core ready");

        Self {
            metadata_cache,
            enricher,
            images,
            session,
            event_bus,
            defaults: config.ranking,
        }
    }

    /// Refresh using the configured defaults.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_with(LoadRequest::from_defaults(&self.defaults))
            .await
    }

    pub async fn refresh_with(&self, request: LoadRequest) -> RefreshOutcome {
        self.session.refresh(request).await
    }

    /// Current ranking as last applied.
    pub async fn snapshot(&self) -> RankingState {
        self.session.snapshot().await
    }

    /// Look up one entry outside of a refresh.
    pub async fn lookup(&self, entry: &ChartEntry) -> Result<TrackMetadata> {
        Ok(self.enricher.enrich(entry).await?)
    }

    /// Stream of refresh lifecycle events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn metadata_cache(&self) -> &MetadataLookupCache {
        &self.metadata_cache
    }

    /// Write out any pending metadata cache changes.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.metadata_cache.flush().await {
            warn!(error = %e, "Failed to flush metadata cache on shutdown");
            return Err(e.into());
        }
        info!("Ranking core shut down");
        Ok(())
    }
}

async fn open_metadata(config: &CoreConfig) -> Result<(MetadataLookupCache, Arc<MetadataEnricher>)> {
    config.validate()?;

    config
        .file_system
        .create_dir_all(&config.cache_dir)
        .await
        .map_err(|e| {
            CoreError::InitializationFailed(format!(
                "Cannot create cache directory {}: {}",
                config.cache_dir.display(),
                e
            ))
        })?;

    let metadata_cache = MetadataLookupCache::open(
        Arc::clone(&config.file_system),
        Arc::clone(&config.clock),
        config.metadata_cache_path(),
        &config.metadata,
    )
    .await;

    let enricher = Arc::new(MetadataEnricher::new(
        Arc::clone(&config.http_client),
        metadata_cache.clone(),
        &config.search,
    ));

    Ok((metadata_cache, enricher))
}
