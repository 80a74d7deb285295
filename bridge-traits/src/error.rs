use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// The response body passed the request's `max_body_bytes`. `received`
    /// is the declared length or the bytes read before giving up.
    #[error("Response body too large: {received} bytes exceeds limit of {limit}")]
    BodyTooLarge { received: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
