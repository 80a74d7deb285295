//! Runtime-level errors raised while assembling configuration or logging.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bridge was not injected and no platform default is available.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// Creating a platform default failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
