//! Gateway request handling and admin surface.

use std::sync::Arc;
use std::time::Duration;

use edge_cache::{CacheStats, WarmReport};
use edge_core::{
    AdminSettings, CacheOverrides, GatewayConfig, GatewayRequest, KeyStrategy, ManualClock, Method,
    RouteConfig,
};
use edge_data::{MockUpstream, UpstreamResponse};
use edge_executor::{BackgroundExecutor, DeferredExecutor};
use edge_gateway::{DeleteResponse, Gateway, GatewayResponse, InvalidateResponse};
use edge_kv::MemoryStore;

const T0: u64 = 1_700_000_000_000;

struct Harness {
    gateway: Gateway,
    upstream: MockUpstream,
    executor: Arc<DeferredExecutor>,
    clock: ManualClock,
}

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.admin = AdminSettings {
        enabled: true,
        prefix: "/__cache".to_string(),
    };
    config.routes.push(
        RouteConfig::new("/api", "https://api.internal").with_cache(CacheOverrides {
            key_params: Some(vec!["page".to_string()]),
            ..Default::default()
        }),
    );
    config.routes.push(
        RouteConfig::new("/api/me", "https://users.internal").with_cache(CacheOverrides {
            strategy: Some(KeyStrategy::PathHeaders),
            key_headers: Some(vec!["Authorization".to_string()]),
            ..Default::default()
        }),
    );
    config.paths.insert(
        "/api/cart".to_string(),
        CacheOverrides {
            enabled: Some(false),
            ..Default::default()
        },
    );
    config
}

fn harness() -> Harness {
    let clock = ManualClock::new(T0);
    let upstream = MockUpstream::new();
    let executor = Arc::new(DeferredExecutor::new());
    let gateway = Gateway::new(
        config(),
        Arc::new(MemoryStore::with_clock(Arc::new(clock.clone()))),
        Arc::new(clock.clone()),
        Arc::new(upstream.clone()),
        executor.clone(),
    );
    Harness {
        gateway,
        upstream,
        executor,
        clock,
    }
}

fn get(path: &str) -> GatewayRequest {
    GatewayRequest::new(Method::Get, path)
}

fn json<T: serde::de::DeserializeOwned>(response: &GatewayResponse) -> T {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn cached_proxy_round_trip() {
    let h = harness();
    h.upstream.respond(
        "https://api.internal/api/products?page=1&ref=nav",
        UpstreamResponse::new(200, "[1]")
            .with_header("Content-Type", "application/json")
            .with_header("Content-Length", "3"),
    );

    let miss = h.gateway.handle(get("/api/products?page=1&ref=nav")).await;
    assert_eq!(miss.status, 200);
    assert_eq!(miss.header("x-cache-status"), Some("MISS"));
    assert!(miss.header("x-request-id").is_some());
    assert_eq!(miss.header("content-length"), None);

    // Extraneous params do not split the entry.
    let hit = h.gateway.handle(get("/api/products?ref=footer&page=1")).await;
    assert_eq!(hit.header("x-cache-status"), Some("HIT"));
    assert_eq!(hit.header("content-type"), Some("application/json"));
    assert_eq!(hit.body, b"[1]");
    assert_eq!(h.upstream.calls(), 1);
    assert_eq!(miss.header("x-cache-key"), hit.header("x-cache-key"));
}

#[tokio::test]
async fn stale_response_refreshes_after_drain() {
    let h = harness();
    let url = "https://api.internal/api/products";
    h.upstream.respond(url, UpstreamResponse::new(200, "old"));
    h.gateway.handle(get("/api/products")).await;

    h.clock.advance(Duration::from_secs(400));
    h.upstream.respond(url, UpstreamResponse::new(200, "new"));
    let stale = h.gateway.handle(get("/api/products")).await;
    assert_eq!(stale.header("x-cache-status"), Some("STALE"));
    assert_eq!(stale.body, b"old");
    assert_eq!(h.executor.pending(), 1);

    h.executor.drain().await;
    let fresh = h.gateway.handle(get("/api/products")).await;
    assert_eq!(fresh.header("x-cache-status"), Some("HIT"));
    assert_eq!(fresh.body, b"new");
}

#[tokio::test]
async fn header_strategy_separates_users() {
    let h = harness();
    h.upstream
        .respond("https://users.internal/api/me", UpstreamResponse::new(200, "me"));

    let alice = get("/api/me").with_header("Authorization", "Bearer a");
    let bob = get("/api/me").with_header("authorization", "Bearer b");
    h.gateway.handle(alice.clone()).await;
    let again = h.gateway.handle(alice).await;
    let other = h.gateway.handle(bob).await;

    assert_eq!(again.header("x-cache-status"), Some("HIT"));
    assert_eq!(other.header("x-cache-status"), Some("MISS"));
    assert_eq!(h.upstream.calls_to("https://users.internal/api/me"), 2);
}

#[tokio::test]
async fn disabled_paths_and_unsafe_methods_bypass() {
    let h = harness();
    h.upstream
        .respond("https://api.internal/api/cart", UpstreamResponse::new(200, "cart"));
    h.upstream
        .respond("https://api.internal/api/orders", UpstreamResponse::new(201, "created"));

    let cart = h.gateway.handle(get("/api/cart")).await;
    assert_eq!(cart.header("x-cache-status"), Some("BYPASS"));

    let order = h
        .gateway
        .handle(GatewayRequest::new(Method::Put, "/api/orders").with_body("{}"))
        .await;
    assert_eq!(order.status, 201);
    assert_eq!(order.header("x-cache-status"), Some("BYPASS"));
    assert_eq!(h.upstream.requests()[1].method, Method::Put);
}

#[tokio::test]
async fn upstream_failures_map_to_gateway_errors() {
    let h = harness();
    h.upstream.fail("https://api.internal/api/down", "refused");

    let unrouted = h.gateway.handle(get("/nowhere")).await;
    assert_eq!(unrouted.status, 404);

    let down = h.gateway.handle(get("/api/down")).await;
    assert_eq!(down.status, 502);
    let body: serde_json::Value = json(&down);
    assert_eq!(body["status"], 502);

    h.upstream
        .respond("https://api.internal/api/gone", UpstreamResponse::new(410, "gone"));
    let gone = h.gateway.handle(get("/api/gone")).await;
    assert_eq!(gone.status, 410);
    assert_eq!(gone.header("x-cache-status"), Some("MISS"));
}

#[tokio::test]
async fn admin_invalidate_preview_delete() {
    let h = harness();
    for id in 1..=2 {
        let url = format!("https://api.internal/api/products/{}", id);
        h.upstream.respond(url, UpstreamResponse::new(200, format!("p{}", id)));
        h.gateway.handle(get(&format!("/api/products/{}", id))).await;
    }

    let invalidate = GatewayRequest::new(Method::Post, "/__cache/invalidate")
        .with_body(r#"{"pattern":"/api/products/*"}"#);
    let resp = h.gateway.handle(invalidate.clone()).await;
    assert_eq!(resp.status, 200);
    assert_eq!(json::<InvalidateResponse>(&resp).invalidated, 2);
    let again = h.gateway.handle(invalidate).await;
    assert_eq!(json::<InvalidateResponse>(&again).invalidated, 0);

    let preview = h
        .gateway
        .handle(get("/__cache/preview?path=/api/products/1&content=1"))
        .await;
    let previews: serde_json::Value = json(&preview);
    assert_eq!(previews[0]["content"], "p1");
    assert_eq!(previews[0]["expired"], true);
    let key = previews[0]["key"].as_str().unwrap().to_string();

    let delete = h
        .gateway
        .handle(GatewayRequest::new(
            Method::Delete,
            &format!("/__cache/entry?key={}", key),
        ))
        .await;
    assert!(json::<DeleteResponse>(&delete).deleted);

    let missing = h
        .gateway
        .handle(get(&format!("/__cache/preview?key={}", key)))
        .await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn admin_stats_and_warm() {
    let h = harness();
    h.upstream
        .respond("https://api.internal/api/home", UpstreamResponse::new(200, "home"));

    let warm = GatewayRequest::new(Method::Post, "/__cache/warm")
        .with_body(r#"{"paths":["/api/home","/api/cart"]}"#);
    let report: WarmReport = json(&h.gateway.handle(warm).await);
    assert_eq!(report.warmed(), 1);

    let hit = h.gateway.handle(get("/api/home")).await;
    assert_eq!(hit.header("x-cache-status"), Some("HIT"));

    let stats: CacheStats = json(&h.gateway.handle(get("/__cache/stats")).await);
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.hits, 1);

    let bad = h
        .gateway
        .handle(GatewayRequest::new(Method::Post, "/__cache/invalidate").with_body("nope"))
        .await;
    assert_eq!(bad.status, 400);
    let wrong_method = h.gateway.handle(get("/__cache/warm")).await;
    assert_eq!(wrong_method.status, 405);
}

#[tokio::test]
async fn head_never_fills_the_get_entry() {
    let h = harness();
    let url = "https://api.internal/api/products";
    h.upstream.respond(url, UpstreamResponse::new(200, ""));

    let head = h.gateway.handle(GatewayRequest::new(Method::Head, "/api/products")).await;
    assert_eq!(head.header("x-cache-status"), Some("MISS"));
    assert!(head.body.is_empty());

    h.upstream.respond(url, UpstreamResponse::new(200, "[1,2,3]"));
    let first = h.gateway.handle(get("/api/products")).await;
    assert_eq!(first.header("x-cache-status"), Some("MISS"));
    assert_eq!(first.body, b"[1,2,3]");

    // HEAD still reads what GET stored.
    let head = h.gateway.handle(GatewayRequest::new(Method::Head, "/api/products")).await;
    assert_eq!(head.header("x-cache-status"), Some("HIT"));
    assert!(head.body.is_empty());
    assert_eq!(h.upstream.calls(), 2);
}

#[tokio::test]
async fn post_is_cached_apart_from_get() {
    let h = harness();
    h.upstream.respond(
        "https://api.internal/api/products",
        UpstreamResponse::new(200, "created-by-post"),
    );
    h.upstream.respond(
        "https://api.internal/api/products?page=1",
        UpstreamResponse::new(200, "page-one"),
    );

    let post = h
        .gateway
        .handle(GatewayRequest::new(Method::Post, "/api/products").with_body(r#"{"page":"1"}"#))
        .await;
    assert_eq!(post.body, b"created-by-post");

    let page = h.gateway.handle(get("/api/products?page=1")).await;
    assert_eq!(page.header("x-cache-status"), Some("MISS"));
    assert_eq!(page.body, b"page-one");
    assert_ne!(post.header("x-cache-key"), page.header("x-cache-key"));
}

#[tokio::test]
async fn set_cookie_reaches_only_the_original_caller() {
    let h = harness();
    h.upstream.respond(
        "https://api.internal/api/products",
        UpstreamResponse::new(200, "[1]")
            .with_header("Content-Type", "application/json")
            .with_header("Set-Cookie", "session=alice-secret"),
    );

    let alice = h.gateway.handle(get("/api/products")).await;
    assert_eq!(alice.header("x-cache-status"), Some("MISS"));
    assert_eq!(alice.header("set-cookie"), Some("session=alice-secret"));

    let bob = h.gateway.handle(get("/api/products")).await;
    assert_eq!(bob.header("x-cache-status"), Some("HIT"));
    assert_eq!(bob.header("set-cookie"), None);
    assert_eq!(bob.header("content-type"), Some("application/json"));
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_times_out_with_504() {
    let h = harness();
    h.upstream.respond(
        "https://api.internal/api/products",
        UpstreamResponse::new(200, "late"),
    );
    h.upstream.set_delay(Duration::from_secs(60));

    let resp = h.gateway.handle(get("/api/products")).await;
    assert_eq!(resp.status, 504);
}
