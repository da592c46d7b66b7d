//! Per-request metrics.
//!
//! There are no process-wide counters: each request owns a [`RequestMetrics`],
//! fills it in as it goes and emits it once at the end. Aggregation is left
//! to whatever consumes the log stream.

use std::time::{Duration, Instant};

use edge_core::RequestId;
use serde::Serialize;
use tracing::info;

/// Upstream call made while serving a request.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamMetrics {
    pub host: String,
    /// Response status; absent on transport failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accumulates what happened while serving one request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub request_id: String,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker_state: Option<String>,
    pub refresh_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub total_duration_ms: u64,
    #[serde(skip)]
    start: Option<Instant>,
}

impl RequestMetrics {
    /// Start timing a request.
    pub fn start(request_id: &RequestId, method: &str, path: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            cache_status: None,
            cache_key: None,
            upstream: None,
            breaker_state: None,
            refresh_scheduled: false,
            status_code: None,
            total_duration_ms: 0,
            start: Some(Instant::now()),
        }
    }

    pub fn set_cache(&mut self, status: impl ToString, key: Option<&str>) {
        self.cache_status = Some(status.to_string());
        self.cache_key = key.map(str::to_string);
    }

    pub fn set_refresh_scheduled(&mut self, scheduled: bool) {
        self.refresh_scheduled = scheduled;
    }

    pub fn set_breaker_state(&mut self, state: impl ToString) {
        self.breaker_state = Some(state.to_string());
    }

    /// Record an upstream exchange.
    pub fn record_upstream(
        &mut self,
        host: &str,
        status: Option<u16>,
        duration: Duration,
        error: Option<String>,
    ) {
        self.upstream = Some(UpstreamMetrics {
            host: host.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            error,
        });
    }

    /// Stamp the final status and elapsed time.
    pub fn finish(&mut self, status_code: u16) {
        self.status_code = Some(status_code);
        if let Some(start) = self.start {
            self.total_duration_ms = start.elapsed().as_millis() as u64;
        }
    }

    /// Serialize for log aggregation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Emit as a single structured event.
    pub fn emit(&self) {
        info!(
            request_id = %self.request_id,
            method = %self.method,
            path = %self.path,
            cache_status = self.cache_status.as_deref().unwrap_or("-"),
            cache_key = self.cache_key.as_deref().unwrap_or("-"),
            upstream_host = self.upstream.as_ref().map(|u| u.host.as_str()).unwrap_or("-"),
            upstream_status = self.upstream.as_ref().and_then(|u| u.status).unwrap_or(0),
            upstream_ms = self.upstream.as_ref().map(|u| u.duration_ms).unwrap_or(0),
            breaker_state = self.breaker_state.as_deref().unwrap_or("-"),
            refresh_scheduled = self.refresh_scheduled,
            status = self.status_code.unwrap_or(0),
            duration_ms = self.total_duration_ms,
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_and_serializes() {
        let id = RequestId::from_string("req-1");
        let mut metrics = RequestMetrics::start(&id, "GET", "/products");
        metrics.set_cache("STALE", Some("cache:v1:/products:abc"));
        metrics.set_refresh_scheduled(true);
        metrics.record_upstream("api.internal", Some(200), Duration::from_millis(42), None);
        metrics.finish(200);

        let json: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["cache_status"], "STALE");
        assert_eq!(json["refresh_scheduled"], true);
        assert_eq!(json["upstream"]["duration_ms"], 42);
        assert_eq!(json["status_code"], 200);
        assert!(json.get("breaker_state").is_none());
        assert!(json.get("start").is_none());
    }

    #[test]
    fn test_emit_without_subscriber() {
        let metrics = RequestMetrics::start(&RequestId::generate(), "POST", "/search");
        metrics.emit();
    }
}
