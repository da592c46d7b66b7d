//! Request handling: routing, key derivation and cached proxying.

use std::sync::Arc;
use std::time::Instant;

use edge_cache::{derive_request_key, CacheError, CacheOrchestrator, CacheRequest, CacheStatus};
use edge_core::{
    ConfigResolver, GatewayConfig, GatewayRequest, Method, RouteTable, SharedClock,
    StaticResolver,
};
use edge_data::SharedUpstream;
use edge_executor::SharedExecutor;
use edge_kv::SharedStore;
use edge_observability::RequestMetrics;
use tracing::{debug, warn};

use crate::admin;
use crate::error::GatewayError;
use crate::response::GatewayResponse;

/// The gateway: resolves each request to an upstream and serves it
/// through the cache.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    resolver: Arc<dyn ConfigResolver>,
    routes: RouteTable,
    orchestrator: CacheOrchestrator,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.routes)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl Gateway {
    /// Wire a gateway from its collaborators.
    pub fn new(
        config: GatewayConfig,
        kv: SharedStore,
        clock: SharedClock,
        upstream: SharedUpstream,
        executor: SharedExecutor,
    ) -> Self {
        let orchestrator = CacheOrchestrator::from_config(kv, clock, upstream, executor, &config);
        Self {
            resolver: Arc::new(StaticResolver::new(config.clone())),
            routes: RouteTable::from_config(&config),
            config: Arc::new(config),
            orchestrator,
        }
    }

    /// Replace the config resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn ConfigResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &CacheOrchestrator {
        &self.orchestrator
    }

    pub(crate) fn resolver(&self) -> &dyn ConfigResolver {
        self.resolver.as_ref()
    }

    pub(crate) fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Serve one request. Never fails: errors become JSON error responses.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let admin = &self.config.admin;
        if admin.enabled && admin::is_admin_path(&admin.prefix, &request.path) {
            let response = match admin::route(self, &request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(path = %request.path, error = %e, "admin request failed");
                    GatewayResponse::error(&e)
                }
            };
            return response.with_request_id(&request.request_id);
        }

        let mut metrics =
            RequestMetrics::start(&request.request_id, request.method.as_str(), &request.path);
        let response = match self.proxy(&request, &mut metrics).await {
            Ok(response) => response,
            Err(e) => {
                warn!(path = %request.path, error = %e, "request failed");
                GatewayResponse::error(&e)
            }
        };
        metrics.finish(response.status);
        metrics.emit();
        response.with_request_id(&request.request_id)
    }

    async fn proxy(
        &self,
        request: &GatewayRequest,
        metrics: &mut RequestMetrics,
    ) -> Result<GatewayResponse, GatewayError> {
        let path_and_query = request.path_and_query();
        let target = self
            .routes
            .resolve(&path_and_query)
            .ok_or_else(|| GatewayError::NoRoute(request.path.clone()))?;

        let mut config = self.resolver.resolve(&request.path);
        if !request.method.is_cacheable() {
            config.enabled = false;
        }
        let key = derive_request_key(request, &config);
        debug!(path = %request.path, cache_key = %key, strategy = %config.strategy, "request resolved");

        let host = target.host.clone();
        let cache_request = CacheRequest {
            key,
            path: request.path.clone(),
            config,
            target,
            method: request.method,
            headers: request.headers.clone(),
            body: request.body.clone(),
        };

        let started = Instant::now();
        match self.orchestrator.handle(cache_request).await {
            Ok(response) => {
                let status = response.cache_status();
                if let Some(status) = status {
                    metrics.set_cache(status, response.explain.cache_key.as_deref());
                }
                if matches!(status, Some(CacheStatus::Miss) | Some(CacheStatus::Bypass)) {
                    metrics.record_upstream(&host, Some(response.status), started.elapsed(), None);
                }
                metrics.set_refresh_scheduled(response.refresh_scheduled);
                let mut response = GatewayResponse::from(response);
                if request.method == Method::Head {
                    response.body.clear();
                }
                Ok(response)
            }
            Err(CacheError::Upstream(e)) => {
                metrics.record_upstream(&host, None, started.elapsed(), Some(e.to_string()));
                let breaker = self.orchestrator.breaker().record(&host).await;
                metrics.set_breaker_state(breaker.state);
                Err(GatewayError::Cache(CacheError::Upstream(e)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
