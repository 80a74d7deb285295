use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    /// No local candidate path held the chart file.
    #[error("Chart file {file_name} not found in {searched} candidate locations")]
    NotFound { file_name: String, searched: usize },

    /// A chart file was found but is not a valid entry array.
    #[error("Failed to parse chart from {location}: {message}")]
    Parse { location: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote chart is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Rejected before any request was made.
    #[error("Only https chart URLs are allowed: {0}")]
    InsecureScheme(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl SourceError {
    /// Whether this failure came from the remote path.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SourceError::Network(_) | SourceError::TooLarge { .. } | SourceError::InsecureScheme(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
