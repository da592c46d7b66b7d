//! Gateway error types.

use edge_cache::CacheError;
use serde::Serialize;

/// Errors that end request handling with an error response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no upstream route for {0}")]
    NoRoute(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoRoute(_) | Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::MethodNotAllowed => 405,
            Self::Cache(CacheError::Upstream(e)) if e.is_timeout() => 504,
            Self::Cache(CacheError::Upstream(_)) => 502,
            Self::Cache(CacheError::InvalidKey(_)) | Self::Cache(CacheError::Pattern(_)) => 400,
            Self::Cache(_) => 500,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    pub status: u16,
}
