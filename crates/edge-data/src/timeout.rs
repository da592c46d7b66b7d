//! Per-purpose upstream timeouts.

use std::time::Duration;

use edge_core::TimeoutSettings;

use crate::SharedUpstream;

/// Why an upstream is being contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// Synchronous fetch on a cache miss.
    Miss,
    /// Background stale-while-revalidate refresh.
    Refresh,
    /// Proactive cache warming.
    Warm,
}

impl FetchPurpose {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Miss => "miss",
            Self::Refresh => "refresh",
            Self::Warm => "warm",
        }
    }
}

/// Timeout per fetch purpose. Warming is always the tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub miss: Duration,
    pub refresh: Duration,
    pub warm: Duration,
}

impl FetchTimeouts {
    /// Timeout for `purpose`.
    pub fn for_purpose(&self, purpose: FetchPurpose) -> Duration {
        match purpose {
            FetchPurpose::Miss => self.miss,
            FetchPurpose::Refresh => self.refresh,
            FetchPurpose::Warm => self.warm,
        }
    }
}

impl From<&TimeoutSettings> for FetchTimeouts {
    fn from(settings: &TimeoutSettings) -> Self {
        Self {
            miss: Duration::from_millis(settings.miss_ms),
            refresh: Duration::from_millis(settings.refresh_ms),
            warm: Duration::from_millis(settings.warm_ms),
        }
    }
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self::from(&TimeoutSettings::default())
    }
}

/// Make `upstream` honor each request's [`UpstreamRequest::timeout`].
///
/// On `wasm32` the deadline travels with the outbound request and the host
/// enforces it, so the upstream is returned as is.
///
/// [`UpstreamRequest::timeout`]: crate::UpstreamRequest::timeout
pub fn enforce_deadlines(upstream: SharedUpstream) -> SharedUpstream {
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::sync::Arc::new(TimeoutUpstream::new(upstream))
    }
    #[cfg(target_arch = "wasm32")]
    {
        upstream
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::TimeoutUpstream;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use async_trait::async_trait;
    use tracing::warn;

    use crate::{FetchError, Upstream, UpstreamRequest, UpstreamResponse};

    /// Enforces [`UpstreamRequest::timeout`] around an inner upstream.
    #[derive(Debug, Clone)]
    pub struct TimeoutUpstream<U> {
        inner: U,
    }

    impl<U> TimeoutUpstream<U> {
        pub fn new(inner: U) -> Self {
            Self { inner }
        }

        pub fn inner(&self) -> &U {
            &self.inner
        }
    }

    #[async_trait]
    impl<U: Upstream> Upstream for TimeoutUpstream<U> {
        async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
            let after = request.timeout;
            let url = request.url.clone();
            match tokio::time::timeout(after, self.inner.send(request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(url = %url, timeout_ms = after.as_millis() as u64, "upstream timed out");
                    Err(FetchError::Timeout { url, after })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, MockUpstream, Upstream, UpstreamRequest, UpstreamResponse};

    #[test]
    fn test_from_settings() {
        let timeouts = FetchTimeouts::default();
        assert_eq!(timeouts.for_purpose(FetchPurpose::Miss), Duration::from_secs(10));
        assert_eq!(timeouts.for_purpose(FetchPurpose::Refresh), Duration::from_secs(8));
        assert_eq!(timeouts.for_purpose(FetchPurpose::Warm), Duration::from_secs(5));
        assert!(timeouts.warm < timeouts.refresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_upstream_times_out() {
        let mock = MockUpstream::new();
        mock.respond("https://slow.internal/x", UpstreamResponse::new(200, "ok"));
        mock.set_delay(Duration::from_secs(30));

        let upstream = TimeoutUpstream::new(mock.clone());
        let err = upstream
            .send(UpstreamRequest::get(
                "https://slow.internal/x",
                Duration::from_millis(100),
            ))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_deadlines_on_shared_upstream() {
        let mock = MockUpstream::new();
        mock.respond("https://slow.internal/x", UpstreamResponse::new(200, "ok"));
        mock.set_delay(Duration::from_secs(30));

        let upstream = enforce_deadlines(std::sync::Arc::new(mock.clone()));
        let err = upstream
            .send(UpstreamRequest::get(
                "https://slow.internal/x",
                Duration::from_secs(8),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { after, .. } if after == Duration::from_secs(8)));
    }

    #[tokio::test]
    async fn test_timeout_upstream_passes_through() {
        let mock = MockUpstream::new();
        mock.respond("https://fast.internal/x", UpstreamResponse::new(200, "ok"));

        let upstream = TimeoutUpstream::new(mock.clone());
        let resp = upstream
            .send(UpstreamRequest::get(
                "https://fast.internal/x",
                Duration::from_secs(1),
            ))
            .await
            .unwrap();
        assert_eq!(resp.body, b"ok");
        assert_eq!(mock.calls(), 1);
    }
}
