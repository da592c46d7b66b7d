//! JSON admin surface for cache operations.
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | POST | `{prefix}/invalidate` | soft-expire by glob or key |
//! | GET | `{prefix}/stats` | entry and traffic stats |
//! | GET | `{prefix}/preview?path=&version=&content=1` or `?key=` | entry metadata |
//! | POST | `{prefix}/warm` | pre-populate paths |
//! | DELETE | `{prefix}/entry?key=` | hard delete |

use std::collections::HashMap;

use edge_cache::ParsedCacheKey;
use edge_core::{GatewayRequest, Method};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GatewayError;
use crate::handler::Gateway;
use crate::response::GatewayResponse;

/// Body of `POST /invalidate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub invalidated: usize,
}

/// Body of `POST /warm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmRequest {
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub key: String,
    pub deleted: bool,
}

pub(crate) fn is_admin_path(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn query_map(request: &GatewayRequest) -> HashMap<String, String> {
    request
        .query
        .as_deref()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn body_json<T: for<'de> Deserialize<'de>>(request: &GatewayRequest) -> Result<T, GatewayError> {
    let body = request
        .body
        .as_deref()
        .ok_or_else(|| GatewayError::BadRequest("missing JSON body".into()))?;
    Ok(serde_json::from_slice(body)?)
}

fn flag(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("1" | "true" | "yes"))
}

pub(crate) async fn route(
    gateway: &Gateway,
    request: &GatewayRequest,
) -> Result<GatewayResponse, GatewayError> {
    let prefix = gateway.config().admin.prefix.trim_end_matches('/');
    let op = request
        .path
        .strip_prefix(prefix)
        .unwrap_or_default()
        .trim_matches('/');
    let entries = gateway.orchestrator().entries();

    match (request.method, op) {
        (Method::Post, "invalidate") => {
            let body: InvalidateRequest = body_json(request)?;
            if body.pattern.is_empty() {
                return Err(GatewayError::BadRequest("pattern must not be empty".into()));
            }
            let invalidated = entries.invalidate(&body.pattern).await;
            Ok(GatewayResponse::json(
                200,
                &InvalidateResponse {
                    pattern: body.pattern,
                    invalidated,
                },
            ))
        }
        (Method::Get, "stats") => Ok(GatewayResponse::json(200, &entries.stats().await)),
        (Method::Get, "preview") => {
            let query = query_map(request);
            let content = flag(query.get("content"));
            if let Some(key) = query.get("key") {
                ParsedCacheKey::parse(key)?;
                let preview = entries
                    .preview_key(key, content)
                    .await
                    .ok_or_else(|| GatewayError::NotFound(key.clone()))?;
                return Ok(GatewayResponse::json(200, &preview));
            }
            let path = query
                .get("path")
                .ok_or_else(|| GatewayError::BadRequest("path or key is required".into()))?;
            let version = match query.get("version") {
                Some(v) => v
                    .parse::<u32>()
                    .map_err(|_| GatewayError::BadRequest(format!("invalid version {}", v)))?,
                None => gateway.resolver().resolve(path).version,
            };
            Ok(GatewayResponse::json(
                200,
                &entries.preview(path, version, content).await,
            ))
        }
        (Method::Post, "warm") => {
            let body: WarmRequest = body_json(request)?;
            let report = gateway
                .orchestrator()
                .warm(&body.paths, body.version, gateway.resolver(), gateway.routes())
                .await;
            Ok(GatewayResponse::json(200, &report))
        }
        (Method::Delete, "entry") => {
            let key = query_map(request)
                .remove("key")
                .ok_or_else(|| GatewayError::BadRequest("key is required".into()))?;
            let deleted = entries.delete(&key).await;
            info!(cache_key = %key, deleted, "admin delete");
            Ok(GatewayResponse::json(200, &DeleteResponse { key, deleted }))
        }
        (_, "invalidate" | "stats" | "preview" | "warm" | "entry") => {
            Err(GatewayError::MethodNotAllowed)
        }
        _ => Err(GatewayError::NotFound(request.path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_path_matching() {
        assert!(is_admin_path("/__cache", "/__cache/stats"));
        assert!(is_admin_path("/__cache/", "/__cache"));
        assert!(!is_admin_path("/__cache", "/__cachex/stats"));
        assert!(!is_admin_path("/__cache", "/api/stats"));
    }

    #[test]
    fn test_flag() {
        assert!(flag(Some(&"1".to_string())));
        assert!(flag(Some(&"true".to_string())));
        assert!(!flag(Some(&"0".to_string())));
        assert!(!flag(None));
    }
}
