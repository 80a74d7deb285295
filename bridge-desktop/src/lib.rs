//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (rustls, connection pooling, per-request timeouts)
//! - `FileSystemAccess` using `tokio::fs` and the platform cache directory from `dirs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let fs = Arc::new(TokioFileSystem::new());
//! // Hand both to `CoreConfig::builder()`
//! ```

mod filesystem;
mod http;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
