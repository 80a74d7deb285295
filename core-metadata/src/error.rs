use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    /// The search API answered definitively with no matching track.
    #[error("No results for search term: {0}")]
    NoResults(String),

    /// Transport failure, exhausted retries or an undecodable response.
    #[error("Network error: {0}")]
    Network(String),

    /// The cache snapshot could not be encoded or decoded.
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Image processing failed: {message}")]
    ImageProcessing { message: String },

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

/// Failure of a single enrichment lookup.
pub type EnrichError = MetadataError;

pub type Result<T> = std::result::Result<T, MetadataError>;
