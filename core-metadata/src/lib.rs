//! # Chart Metadata Module
//!
//! Enriches chart entries with track metadata and caches what it fetches.
//!
//! ## Overview
//!
//! This module handles:
//! - Track lookups against the search API with bounded retries ([`enricher`])
//! - A TTL-based lookup cache persisted through `FileSystemAccess` ([`cache`])
//! - A cost-bounded, de-duplicating artwork image cache ([`artwork`])
//! - The shared chart data model ([`models`])

pub mod artwork;
pub mod cache;
pub mod enricher;
pub mod error;
pub mod models;

pub use artwork::{ImageCache, ImageCacheStats};
pub use cache::MetadataLookupCache;
pub use enricher::MetadataEnricher;
pub use error::{EnrichError, MetadataError, Result};
pub use models::{ChartEntry, EnrichmentStatus, RankedItem, SearchResponse, TrackMetadata};
