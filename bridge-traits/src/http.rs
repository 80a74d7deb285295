//! HTTP Client Abstraction
//!
//! Provides async HTTP operations with timeouts. Retry decisions belong to the
//! caller, which knows whether a status is definitive for its API; the
//! [`RetryPolicy`] value describes how a caller should back off.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    /// Upper bound on the response body. Adapters stop reading and fail with
    /// [`BridgeError::BodyTooLarge`](crate::error::BridgeError::BodyTooLarge)
    /// once it is passed.
    pub max_body_bytes: Option<usize>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
            max_body_bytes: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Build a response with no headers. Mostly useful for test doubles.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// With exponential backoff the delays are `base`, `2 * base`, `4 * base`...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Async HTTP client trait
///
/// This trait abstracts HTTP operations to allow platform-specific
/// implementations and test doubles. Implementations execute exactly one
/// network round trip per call: non-2xx statuses are returned as responses,
/// and only failures to obtain a status at all become errors.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn fetch_chart(client: &dyn HttpClient) -> Result<Vec<u8>> {
///     let request = HttpRequest::get("https://example.com/chart.json");
///     let response = client.execute(request).await?;
///     Ok(response.body.to_vec())
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}
