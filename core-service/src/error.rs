use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(err: core_runtime::Error) -> Self {
        match err {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            core_runtime::Error::Config(message) => CoreError::Config(message),
            core_runtime::Error::Internal(message) => CoreError::InitializationFailed(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
