//! Metadata Enricher - resolve a chart entry to one search result
//!
//! ## Lookup flow
//!
//! 1. A fresh cache record short-circuits the lookup (no network traffic).
//! 2. Otherwise `<endpoint>?term=<title artist>&entity=song&limit=1` is
//!    requested, retrying transient failures with exponential backoff.
//! 3. The first result is cached and returned.
//!
//! ## Status handling
//!
//! | Response                | Outcome                                   |
//! |-------------------------|-------------------------------------------|
//! | 2xx                     | decode; first result or `NoResults`       |
//! | 1xx / 3xx / 4xx         | decode; first result or `NoResults`, never retried |
//! | 5xx / transport failure | retry after `base * 2^(attempt-1)`        |
//! | undecodable body        | `Network`, never retried                  |

use crate::cache::MetadataLookupCache;
use crate::error::{MetadataError, Result};
use crate::models::{ChartEntry, SearchResponse, TrackMetadata};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use core_runtime::config::SearchApiConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Timeout for a single search request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Looks up track metadata for chart entries.
pub struct MetadataEnricher {
    http_client: Arc<dyn HttpClient>,
    cache: MetadataLookupCache,
    endpoint: String,
    artwork_dimension: u32,
    retry_policy: RetryPolicy,
}

impl MetadataEnricher {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        cache: MetadataLookupCache,
        config: &SearchApiConfig,
    ) -> Self {
        Self {
            http_client,
            cache,
            endpoint: config.endpoint.clone(),
            artwork_dimension: config.artwork_dimension,
            retry_policy: config.retry_policy(),
        }
    }

    /// Edge length artwork URLs should be rewritten to when merging results.
    pub fn artwork_dimension(&self) -> u32 {
        self.artwork_dimension
    }

    pub fn cache(&self) -> &MetadataLookupCache {
        &self.cache
    }

    /// Search URL for an entry.
    pub fn search_url(&self, entry: &ChartEntry) -> String {
        format!(
            "{}?term={}&entity=song&limit=1",
            self.endpoint,
            urlencoding::encode(&entry.search_term())
        )
    }

    /// Resolve `entry` to its first search result.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::NoResults`] when the API answered with an empty list
    /// - [`MetadataError::Network`] when retries ran out or the body could
    ///   not be decoded
    #[instrument(skip(self, entry), fields(rank = entry.rank))]
    pub async fn enrich(&self, entry: &ChartEntry) -> Result<TrackMetadata> {
        if let Some(cached) = self.cache.get(&entry.title, &entry.artist).await {
            debug!("Metadata cache hit");
            return Ok(cached);
        }

        let request = HttpRequest::get(self.search_url(entry)).timeout(REQUEST_TIMEOUT);
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.http_client.execute(request.clone()).await {
                Ok(response) if !response.is_server_error() => {
                    if !response.is_success() {
                        debug!(status = response.status, "Non-success search response; not retrying");
                    }
                    let metadata = decode_first(&response, entry)?;
                    self.cache
                        .set(&entry.title, &entry.artist, metadata.clone())
                        .await;
                    return Ok(metadata);
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.retry_policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    error = %last_error,
                    delay_ms = delay.as_millis() as u64,
                    "Search failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(error = %last_error, "Search failed after all attempts");
        Err(MetadataError::Network(last_error))
    }
}

fn decode_first(response: &HttpResponse, entry: &ChartEntry) -> Result<TrackMetadata> {
    let search: SearchResponse = serde_json::from_slice(&response.body).map_err(|e| {
        MetadataError::Network(format!(
            "Undecodable search response (HTTP {}): {}",
            response.status, e
        ))
    })?;

    search
        .results
        .into_iter()
        .next()
        .ok_or_else(|| MetadataError::NoResults(entry.search_term()))
}
