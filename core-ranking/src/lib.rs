//! # Chart Ranking Module
//!
//! Loads a chart, enriches it row by row, and keeps the shared ranking state
//! consistent when refreshes overlap.
//!
//! ## Overview
//!
//! This module handles:
//! - Reading chart entries from a local file or an HTTPS URL ([`source`])
//! - Batched, bounded-concurrency enrichment with incremental updates ([`coordinator`])
//! - "Last refresh wins" application of results to shared state ([`session`])

pub mod coordinator;
pub mod error;
pub mod session;
pub mod source;

pub use coordinator::{
    EnrichmentCoordinator, LoadRequest, RankingLoader, RankingUpdate, UpdateReceiver, UpdateSender,
};
pub use error::{Result, SourceError};
pub use session::{RankingSession, RankingState, RefreshOutcome, SessionGate, SessionToken};
pub use source::{SourceListProvider, SourceSpec};
