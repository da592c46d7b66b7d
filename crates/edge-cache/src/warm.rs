//! Pre-populating the cache for a list of paths.

use edge_core::{ConfigResolver, Headers, Method, Params, RouteTable};
use edge_data::FetchPurpose;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::key::derive_key;
use crate::revalidate::{CacheOrchestrator, CacheRequest};

/// What happened to one path during warming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WarmOutcome {
    /// Fetched and stored.
    Warmed,
    /// A fresh entry already existed; nothing fetched.
    AlreadyCached,
    /// Caching is disabled for the path.
    Disabled,
    /// No upstream route covers the path.
    NoRoute,
    /// The upstream's breaker is open; nothing fetched.
    CircuitOpen,
    /// The fetch or the write failed.
    Failed(String),
}

/// Per-path result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmResult {
    pub path: String,
    pub key: Option<String>,
    #[serde(flatten)]
    pub outcome: WarmOutcome,
}

/// Results of a warming run, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    pub results: Vec<WarmResult>,
}

impl WarmReport {
    /// Number of paths that ended with `outcome`.
    pub fn count(&self, outcome: &WarmOutcome) -> usize {
        self.results.iter().filter(|r| &r.outcome == outcome).count()
    }

    /// Number of paths newly stored.
    pub fn warmed(&self) -> usize {
        self.count(&WarmOutcome::Warmed)
    }

    /// Number of failed paths.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, WarmOutcome::Failed(_)))
            .count()
    }
}

impl CacheOrchestrator {
    /// Fetch and store each path under its parameterless key.
    ///
    /// `version` overrides the resolved version. Paths are handled one at a
    /// time; a failure never stops the run.
    pub async fn warm(
        &self,
        paths: &[String],
        version: Option<u32>,
        resolver: &dyn ConfigResolver,
        routes: &RouteTable,
    ) -> WarmReport {
        let mut report = WarmReport::default();
        for path in paths {
            let (key, outcome) = self.warm_one(path, version, resolver, routes).await;
            debug!(path = %path, ?outcome, "warm result");
            report.results.push(WarmResult {
                path: path.clone(),
                key,
                outcome,
            });
        }
        info!(
            paths = paths.len(),
            warmed = report.warmed(),
            failed = report.failed(),
            "cache warming finished"
        );
        report
    }

    async fn warm_one(
        &self,
        path: &str,
        version: Option<u32>,
        resolver: &dyn ConfigResolver,
        routes: &RouteTable,
    ) -> (Option<String>, WarmOutcome) {
        let mut config = resolver.resolve(path);
        if !config.enabled {
            return (None, WarmOutcome::Disabled);
        }
        if let Some(version) = version {
            config.version = version;
        }

        let key = derive_key(path, &config, &Params::new(), &Headers::new());
        let key_str = key.to_string();
        if self.entries().is_fresh(key.as_str(), config.version).await {
            return (Some(key_str), WarmOutcome::AlreadyCached);
        }

        let Some(target) = routes.resolve(path) else {
            return (Some(key_str), WarmOutcome::NoRoute);
        };
        if self.breaker().check(&target.host).await.should_break {
            return (Some(key_str), WarmOutcome::CircuitOpen);
        }

        let request = CacheRequest {
            key,
            path: path.to_string(),
            config,
            target,
            method: Method::Get,
            headers: Headers::new(),
            body: None,
        };
        let outcome = match self.inner.fetch(&request, FetchPurpose::Warm, None).await {
            Ok(resp) if resp.is_success() => {
                if self
                    .inner
                    .store(request.key.as_str(), path, &request.config, &resp)
                    .await
                {
                    WarmOutcome::Warmed
                } else {
                    WarmOutcome::Failed("entry not stored".to_string())
                }
            }
            Ok(resp) => WarmOutcome::Failed(format!("upstream returned {}", resp.status)),
            Err(e) => WarmOutcome::Failed(e.to_string()),
        };
        (Some(key_str), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::{
        CacheOverrides, GatewayConfig, ManualClock, RouteConfig, StaticResolver,
    };
    use edge_data::{MockUpstream, UpstreamResponse};
    use edge_executor::DeferredExecutor;
    use edge_kv::MemoryStore;
    use std::sync::Arc;

    fn setup(config: &GatewayConfig) -> (CacheOrchestrator, MockUpstream) {
        let clock = ManualClock::new(1_700_000_000_000);
        let upstream = MockUpstream::new();
        let orchestrator = CacheOrchestrator::from_config(
            Arc::new(MemoryStore::with_clock(Arc::new(clock.clone()))),
            Arc::new(clock),
            Arc::new(upstream.clone()),
            Arc::new(DeferredExecutor::new()),
            config,
        );
        (orchestrator, upstream)
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteConfig::new("/api", "https://api.internal"));
        config.paths.insert(
            "/api/live".to_string(),
            CacheOverrides {
                enabled: Some(false),
                ..Default::default()
            },
        );
        config
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_warm_reports_each_path() {
        let config = config();
        let (orchestrator, upstream) = setup(&config);
        let resolver = StaticResolver::new(config.clone());
        let routes = RouteTable::from_config(&config);

        upstream.respond("https://api.internal/api/a", UpstreamResponse::new(200, "a"));
        upstream.respond("https://api.internal/api/b", UpstreamResponse::new(500, "boom"));
        upstream.fail("https://api.internal/api/c", "refused");

        let report = orchestrator
            .warm(
                &paths(&["/api/a", "/api/b", "/api/c", "/api/live", "/other"]),
                None,
                &resolver,
                &routes,
            )
            .await;

        let outcomes: Vec<_> = report.results.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(outcomes[0], WarmOutcome::Warmed);
        assert_eq!(outcomes[1], WarmOutcome::Failed("upstream returned 500".into()));
        assert!(matches!(outcomes[2], WarmOutcome::Failed(_)));
        assert_eq!(outcomes[3], WarmOutcome::Disabled);
        assert_eq!(outcomes[4], WarmOutcome::NoRoute);
        assert_eq!(report.warmed(), 1);
        assert_eq!(report.failed(), 2);
    }

    #[tokio::test]
    async fn test_warm_skips_fresh_entries() {
        let config = config();
        let (orchestrator, upstream) = setup(&config);
        let resolver = StaticResolver::new(config.clone());
        let routes = RouteTable::from_config(&config);
        upstream.respond("https://api.internal/api/a", UpstreamResponse::new(200, "a"));

        let first = orchestrator.warm(&paths(&["/api/a"]), None, &resolver, &routes).await;
        let second = orchestrator.warm(&paths(&["/api/a"]), None, &resolver, &routes).await;
        assert_eq!(first.warmed(), 1);
        assert_eq!(second.results[0].outcome, WarmOutcome::AlreadyCached);
        assert_eq!(upstream.calls(), 1);

        // A different version is a different entry.
        let bumped = orchestrator
            .warm(&paths(&["/api/a"]), Some(2), &resolver, &routes)
            .await;
        assert_eq!(bumped.warmed(), 1);
        assert!(bumped.results[0].key.as_deref().unwrap().starts_with("cache:v2:/api/a:"));
    }

    #[tokio::test]
    async fn test_warm_respects_open_breaker() {
        let config = config();
        let (orchestrator, upstream) = setup(&config);
        let resolver = StaticResolver::new(config.clone());
        let routes = RouteTable::from_config(&config);
        for _ in 0..5 {
            orchestrator.breaker().record_failure("api.internal", None).await;
        }

        let report = orchestrator.warm(&paths(&["/api/a"]), None, &resolver, &routes).await;
        assert_eq!(report.results[0].outcome, WarmOutcome::CircuitOpen);
        assert_eq!(upstream.calls(), 0);
    }
}
