//! Spin HTTP component entry point.

use std::sync::Arc;

use edge_core::{GatewayConfig, GatewayRequest, Method, SystemClock};
use edge_data::SpinUpstream;
use edge_executor::{BackgroundExecutor, DeferredExecutor};
use edge_kv::{KvStore, SpinStore};
use edge_observability::init_tracing;
use futures::SinkExt;
use spin_sdk::http::{Fields, IncomingRequest, Method as SpinMethod, OutgoingResponse, ResponseOutparam};
use spin_sdk::http_component;
use tracing::{error, warn};

use crate::{Gateway, GatewayResponse};

/// Store key of the gateway config document (JSON).
pub const CONFIG_KEY: &str = "config:gateway";

fn method(method: &SpinMethod) -> Option<Method> {
    Some(match method {
        SpinMethod::Get => Method::Get,
        SpinMethod::Post => Method::Post,
        SpinMethod::Put => Method::Put,
        SpinMethod::Delete => Method::Delete,
        SpinMethod::Patch => Method::Patch,
        SpinMethod::Head => Method::Head,
        SpinMethod::Options => Method::Options,
        _ => return None,
    })
}

async fn load_config(store: &SpinStore) -> GatewayConfig {
    match store.get(CONFIG_KEY).await {
        Ok(raw) => GatewayConfig::from_stored(raw.as_deref()),
        Err(e) => {
            warn!(error = %e, "gateway config unreadable, using defaults");
            GatewayConfig::default()
        }
    }
}

async fn into_gateway_request(req: IncomingRequest) -> Result<GatewayRequest, GatewayResponse> {
    let Some(method) = method(&req.method()) else {
        return Err(GatewayResponse::new(405, "method not allowed"));
    };
    let path_with_query = req.path_with_query().unwrap_or_else(|| "/".to_string());
    let mut request = GatewayRequest::new(method, &path_with_query);
    for (name, value) in req.headers().entries() {
        if let Ok(value) = String::from_utf8(value) {
            request.headers.insert(name, value);
        }
    }
    match req.into_body().await {
        Ok(body) if !body.is_empty() => request.body = Some(body),
        Ok(_) => {}
        Err(e) => {
            warn!(error = ?e, "failed to read request body");
            return Err(GatewayResponse::new(400, "unreadable body"));
        }
    }
    Ok(request)
}

async fn write_response(response: GatewayResponse, response_out: ResponseOutparam) {
    let header_list: Vec<(String, Vec<u8>)> = response
        .headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.into_bytes()))
        .collect();
    let headers = match Fields::from_list(&header_list) {
        Ok(headers) => headers,
        Err(e) => {
            error!(error = ?e, "invalid response headers");
            Fields::new()
        }
    };
    let outgoing = OutgoingResponse::new(headers);
    if outgoing.set_status_code(response.status).is_err() {
        error!(status = response.status, "invalid response status");
    }

    let mut body = outgoing.take_body();
    response_out.set(outgoing);
    if let Err(e) = body.send(response.body).await {
        error!(error = %e, "failed to write response body");
    }
}

/// Gateway entry point.
///
/// Background refreshes queued while serving run after the response body
/// has been written.
#[http_component]
async fn handle_gateway(req: IncomingRequest, response_out: ResponseOutparam) {
    let store = SpinStore::open_default();
    let config = load_config(&store).await;
    init_tracing(&config.logging);

    let executor = Arc::new(DeferredExecutor::new());
    let gateway = Gateway::new(
        config,
        Arc::new(store),
        Arc::new(SystemClock),
        Arc::new(SpinUpstream),
        executor.clone(),
    );

    let response = match into_gateway_request(req).await {
        Ok(request) => gateway.handle(request).await,
        Err(response) => response,
    };
    write_response(response, response_out).await;

    executor.drain().await;
}
