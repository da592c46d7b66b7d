//! Upstream request/response model and the fetch seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_core::{Headers, MaybeShared, Method};

/// Error type for fetch operations.
///
/// Non-2xx statuses are not errors here; they come back as responses and the
/// caller decides what they mean.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Timeout after {after:?} for {url}")]
    Timeout { url: String, after: Duration },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl FetchError {
    /// Whether this error came from the timeout guard.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// An outbound request to an upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

impl UpstreamRequest {
    /// Create a GET request.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            timeout,
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace the headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: Option<Vec<u8>>) -> Self {
        self.body = body;
        self
    }
}

/// A response from an upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Header pairs in arrival order; names may repeat.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    /// Create a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Issues HTTP requests to upstream services.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Upstream: MaybeShared {
    /// Send a request and return the upstream response, whatever its status.
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError>;
}

/// Shared upstream handle.
pub type SharedUpstream = Arc<dyn Upstream>;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<U: Upstream + ?Sized> Upstream for Arc<U> {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        (**self).send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_helpers() {
        let resp = UpstreamResponse::new(204, Vec::new()).with_header("ETag", "\"v1\"");
        assert!(resp.is_success());
        assert_eq!(resp.header("etag"), Some("\"v1\""));
        assert!(!UpstreamResponse::new(503, "down").is_success());
    }

    #[test]
    fn test_timeout_error_display() {
        let err = FetchError::Timeout {
            url: "https://api.internal/x".into(),
            after: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Timeout after 250ms for https://api.internal/x"
        );
    }
}
