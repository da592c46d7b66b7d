//! Runtime-neutral response type.

use edge_cache::{header_names, CacheResponse};
use edge_core::RequestId;
use serde::Serialize;

use crate::error::{ErrorBody, GatewayError};

/// A response ready to be written by the hosting runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Serialize `value` as a JSON body.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, body).with_header("content-type", "application/json"),
            Err(e) => Self::error(&GatewayError::from(e)),
        }
    }

    /// JSON error response.
    pub fn error(err: &GatewayError) -> Self {
        let status = err.status_code();
        let body = ErrorBody {
            error: err.to_string(),
            status,
        };
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        Self::new(status, bytes).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_request_id(self, request_id: &RequestId) -> Self {
        self.with_header(header_names::X_REQUEST_ID, request_id.to_string())
    }

    /// First header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<CacheResponse> for GatewayResponse {
    fn from(resp: CacheResponse) -> Self {
        let headers = resp.all_headers();
        Self {
            status: resp.status,
            headers,
            body: resp.body,
        }
    }
}
