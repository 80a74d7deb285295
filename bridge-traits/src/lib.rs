//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host.
//!
//! ## Overview
//!
//! This crate defines the contract between the chart core and
//! platform-specific implementations. The core never talks to the network,
//! the filesystem, or the wall clock directly; it goes through these traits so
//! that tests can substitute deterministic fakes.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with timeouts
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for cache snapshots
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type for
//! consistent error handling. Implementations should convert
//! platform-specific errors to `BridgeError` and keep the context (URL, path).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! enrichment fan-out tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::FileSystemAccess;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
