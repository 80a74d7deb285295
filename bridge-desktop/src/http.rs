//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("chart-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - rustls TLS
/// - Default and per-request timeouts
///
/// Each `execute` call performs a single round trip. Callers own their retry
/// policy because only they know which statuses are definitive.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_send_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout(e.to_string())
        } else if e.is_connect() {
            BridgeError::Connection(e.to_string())
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }
}

/// Accumulates a response body, failing as soon as it passes `limit`.
struct LimitedBody {
    buffer: BytesMut,
    limit: Option<usize>,
}

impl LimitedBody {
    /// Rejects up front when the declared `Content-Length` is already over
    /// the limit.
    fn new(limit: Option<usize>, declared: Option<u64>) -> Result<Self> {
        if let (Some(limit), Some(declared)) = (limit, declared) {
            if declared > limit as u64 {
                return Err(BridgeError::BodyTooLarge {
                    received: usize::try_from(declared).unwrap_or(usize::MAX),
                    limit,
                });
            }
        }

        let capacity = match (limit, declared) {
            (Some(limit), Some(declared)) => (declared as usize).min(limit),
            (None, Some(declared)) => declared as usize,
            _ => 0,
        };

        Ok(Self {
            buffer: BytesMut::with_capacity(capacity),
            limit,
        })
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        let received = self.buffer.len() + chunk.len();
        if let Some(limit) = self.limit {
            if received > limit {
                return Err(BridgeError::BodyTooLarge { received, limit });
            }
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let max_body_bytes = request.max_body_bytes;
        debug!(url = %url, method = ?request.method, "Executing HTTP request");

        let mut response = self.build_request(request).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            Self::map_send_error(e)
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let mut body = LimitedBody::new(max_body_bytes, response.content_length())?;
        while let Some(chunk) = response.chunk().await.map_err(Self::map_send_error)? {
            if let Err(e) = body.push(&chunk) {
                warn!(url = %url, error = %e, "Response body over limit; aborting");
                return Err(e);
            }
        }
        let body = body.finish();

        debug!(url = %url, status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
