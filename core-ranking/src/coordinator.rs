//! # Enrichment Coordinator
//!
//! Turns a chart source into a fully enriched, rank-ordered list.
//!
//! ## Workflow
//!
//! 1. Fetch entries; a failed remote fetch falls back to the local file
//! 2. Apply the cap and sort by rank
//! 3. Seed fallback items and publish them as [`RankingUpdate::Seeded`]
//! 4. Enrich in sequential batches of `concurrency_limit`, one task per entry
//! 5. Publish each finished row as [`RankingUpdate::ItemCompleted`]
//! 6. Return the list sorted by rank
//!
//! A failed lookup leaves the row as its fallback; it never aborts the
//! batch. Only a source that yields nothing at all produces an empty list.

use crate::source::{SourceListProvider, SourceSpec};
use async_trait::async_trait;
use core_metadata::{ChartEntry, EnrichmentStatus, MetadataEnricher, RankedItem};
use core_runtime::config::RankingDefaults;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Parameters of one chart refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source: SourceSpec,
    /// Enrichment lookups in flight at once; `0` is treated as `1`.
    pub concurrency_limit: usize,
    /// Keep only the first `cap` entries of the source.
    pub cap: Option<usize>,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            source: SourceSpec::Local,
            concurrency_limit: 6,
            cap: None,
        }
    }
}

impl LoadRequest {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            source: SourceSpec::Remote(url.into()),
            ..Self::default()
        }
    }

    pub fn from_defaults(defaults: &RankingDefaults) -> Self {
        Self {
            source: SourceSpec::from_optional_url(defaults.remote_url.as_deref()),
            concurrency_limit: defaults.concurrency_limit,
            cap: defaults.cap,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }
}

/// Incremental progress of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankingUpdate {
    /// Un-enriched rows in rank order, sent once before any lookup starts.
    Seeded(Vec<RankedItem>),
    /// One row finished; `item` is the fallback when `status` is `Failed`.
    ItemCompleted {
        rank: u32,
        item: RankedItem,
        status: EnrichmentStatus,
    },
}

pub type UpdateSender = mpsc::UnboundedSender<RankingUpdate>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<RankingUpdate>;

/// Produces a ranked list for a request. Implemented by
/// [`EnrichmentCoordinator`]; the session layer only depends on this trait.
#[async_trait]
pub trait RankingLoader: Send + Sync {
    /// Never fails; problems degrade to fallback rows or an empty list.
    /// The sender is dropped when loading finishes.
    async fn load_ranking(
        &self,
        request: &LoadRequest,
        updates: Option<UpdateSender>,
    ) -> Vec<RankedItem>;
}

pub struct EnrichmentCoordinator {
    source: Arc<SourceListProvider>,
    enricher: Arc<MetadataEnricher>,
}

impl EnrichmentCoordinator {
    pub fn new(source: Arc<SourceListProvider>, enricher: Arc<MetadataEnricher>) -> Self {
        Self { source, enricher }
    }

    async fn fetch_entries(&self, spec: &SourceSpec) -> Vec<ChartEntry> {
        let fetched = match self.source.fetch(spec).await {
            Err(e) if *spec != SourceSpec::Local => {
                warn!(error = %e, "Failed to load remote chart; falling back to local");
                self.source.fetch(&SourceSpec::Local).await
            }
            other => other,
        };

        fetched.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load chart");
            Vec::new()
        })
    }
}

#[async_trait]
impl RankingLoader for EnrichmentCoordinator {
    #[instrument(skip(self, updates), fields(source = ?request.source))]
    async fn load_ranking(
        &self,
        request: &LoadRequest,
        updates: Option<UpdateSender>,
    ) -> Vec<RankedItem> {
        let mut entries = self.fetch_entries(&request.source).await;
        if let Some(cap) = request.cap {
            entries.truncate(cap);
        }
        entries.sort_by_key(|entry| entry.rank);

        let mut items: Vec<RankedItem> = entries.iter().map(RankedItem::fallback).collect();
        publish(&updates, RankingUpdate::Seeded(items.clone()));

        let batch_size = request.concurrency_limit.max(1);
        let artwork_dimension = self.enricher.artwork_dimension();
        let mut enriched = 0usize;

        for (batch_index, batch) in entries.chunks(batch_size).enumerate() {
            debug!(batch = batch_index, size = batch.len(), "Enriching batch");

            let mut tasks = JoinSet::new();
            for (offset, entry) in batch.iter().enumerate() {
                let index = batch_index * batch_size + offset;
                let enricher = Arc::clone(&self.enricher);
                let entry = entry.clone();
                tasks.spawn(async move {
                    let result = enricher.enrich(&entry).await;
                    (index, entry, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (index, entry, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(error = %e, "Enrichment task did not complete");
                        continue;
                    }
                };

                let (item, status) = match result {
                    Ok(metadata) => {
                        enriched += 1;
                        let item = metadata.to_ranked_item(&entry, artwork_dimension);
                        items[index] = item.clone();
                        (item, EnrichmentStatus::Success)
                    }
                    Err(e) => {
                        debug!(rank = entry.rank, error = %e, "Keeping fallback row");
                        (items[index].clone(), EnrichmentStatus::Failed)
                    }
                };

                publish(
                    &updates,
                    RankingUpdate::ItemCompleted {
                        rank: entry.rank,
                        item,
                        status,
                    },
                );
            }
        }

        items.sort_by_key(|item| item.rank);
        info!(total = items.len(), enriched, "Ranking loaded");
        items
    }
}

fn publish(updates: &Option<UpdateSender>, update: RankingUpdate) {
    if let Some(sender) = updates {
        // A dropped receiver only means nobody is listening any more
        let _ = sender.send(update);
    }
}
