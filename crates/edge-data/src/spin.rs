//! Outbound HTTP through `wasi:http/outgoing-handler`.

use std::time::Duration;

use async_trait::async_trait;
use http::Uri;
use tracing::{debug, warn};
use wasi::http::outgoing_handler;
use wasi::http::types::{
    ErrorCode, Fields, IncomingBody, Method as WasiMethod, OutgoingBody, OutgoingRequest,
    RequestOptions, Scheme,
};
use wasi::io::streams::StreamError;

use crate::{FetchError, Upstream, UpstreamRequest, UpstreamResponse};
use edge_core::Method;

const WRITE_CHUNK: usize = 4096;
const READ_CHUNK: u64 = 64 * 1024;

fn wasi_method(method: Method) -> WasiMethod {
    match method {
        Method::Get => WasiMethod::Get,
        Method::Post => WasiMethod::Post,
        Method::Put => WasiMethod::Put,
        Method::Delete => WasiMethod::Delete,
        Method::Patch => WasiMethod::Patch,
        Method::Head => WasiMethod::Head,
        Method::Options => WasiMethod::Options,
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn is_timeout(code: &ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::ConnectionTimeout
            | ErrorCode::ConnectionReadTimeout
            | ErrorCode::ConnectionWriteTimeout
            | ErrorCode::HttpResponseTimeout
    )
}

/// Upstream for Spin components.
///
/// `request.timeout` is handed to the host as connect, first-byte and
/// between-bytes limits. A host timeout surfaces as [`FetchError::Timeout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinUpstream;

impl SpinUpstream {
    fn build(request: &UpstreamRequest) -> Result<OutgoingRequest, FetchError> {
        let uri: Uri = request
            .url
            .parse()
            .map_err(|e| FetchError::Request(format!("invalid url {}: {e}", request.url)))?;

        let entries: Vec<(String, Vec<u8>)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().into_bytes()))
            .collect();
        let fields = Fields::from_list(&entries)
            .map_err(|e| FetchError::Request(format!("invalid headers: {e:?}")))?;

        let outbound = OutgoingRequest::new(fields);
        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") | None => Scheme::Https,
            Some(other) => Scheme::Other(other.to_string()),
        };
        let rejected = |part: &str| FetchError::Request(format!("host rejected {part}"));
        outbound
            .set_method(&wasi_method(request.method))
            .map_err(|()| rejected("method"))?;
        outbound
            .set_scheme(Some(&scheme))
            .map_err(|()| rejected("scheme"))?;
        outbound
            .set_authority(uri.authority().map(|a| a.as_str()))
            .map_err(|()| rejected("authority"))?;
        outbound
            .set_path_with_query(uri.path_and_query().map(|p| p.as_str()))
            .map_err(|()| rejected("path"))?;
        Ok(outbound)
    }

    fn options(timeout: Duration) -> RequestOptions {
        let options = RequestOptions::new();
        let limit = Some(nanos(timeout));
        // Hosts may refuse individual limits; the rest still apply.
        if options.set_connect_timeout(limit).is_err() {
            warn!("host refused connect timeout");
        }
        if options.set_first_byte_timeout(limit).is_err() {
            warn!("host refused first-byte timeout");
        }
        if options.set_between_bytes_timeout(limit).is_err() {
            warn!("host refused between-bytes timeout");
        }
        options
    }

    fn write_body(body: OutgoingBody, bytes: &[u8]) -> Result<(), FetchError> {
        {
            let stream = body
                .write()
                .map_err(|()| FetchError::Request("request body already taken".into()))?;
            for chunk in bytes.chunks(WRITE_CHUNK) {
                stream
                    .blocking_write_and_flush(chunk)
                    .map_err(|e| FetchError::Connection(format!("body write failed: {e:?}")))?;
            }
        }
        OutgoingBody::finish(body, None)
            .map_err(|e| FetchError::Connection(format!("body finish failed: {e:?}")))
    }

    fn read_body(body: IncomingBody) -> Result<Vec<u8>, FetchError> {
        let mut bytes = Vec::new();
        {
            let stream = body
                .stream()
                .map_err(|()| FetchError::Connection("response body already taken".into()))?;
            loop {
                match stream.blocking_read(READ_CHUNK) {
                    Ok(chunk) => bytes.extend_from_slice(&chunk),
                    Err(StreamError::Closed) => break,
                    Err(StreamError::LastOperationFailed(e)) => {
                        return Err(FetchError::Connection(e.to_debug_string()));
                    }
                }
            }
        }
        let _trailers = IncomingBody::finish(body);
        Ok(bytes)
    }
}

#[async_trait(?Send)]
impl Upstream for SpinUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        debug!(url = %request.url, method = %request.method, timeout_ms = request.timeout.as_millis() as u64, "sending upstream request");

        let timed_out = |url: &str| FetchError::Timeout {
            url: url.to_string(),
            after: request.timeout,
        };
        let classify = |code: ErrorCode| {
            if is_timeout(&code) {
                timed_out(&request.url)
            } else {
                FetchError::Connection(format!("{code:?}"))
            }
        };

        let outbound = Self::build(&request)?;
        let body = outbound
            .body()
            .map_err(|()| FetchError::Request("request body already taken".into()))?;
        let future = outgoing_handler::handle(outbound, Some(Self::options(request.timeout)))
            .map_err(classify)?;
        Self::write_body(body, request.body.as_deref().unwrap_or_default())?;

        future.subscribe().block();
        let incoming = match future.get() {
            Some(Ok(Ok(resp))) => resp,
            Some(Ok(Err(code))) => return Err(classify(code)),
            Some(Err(())) => {
                return Err(FetchError::Connection("response already consumed".into()));
            }
            None => return Err(timed_out(&request.url)),
        };

        let status = incoming.status();
        let headers = incoming
            .headers()
            .entries()
            .into_iter()
            .filter_map(|(name, value)| String::from_utf8(value).ok().map(|v| (name, v)))
            .collect();
        let body = incoming
            .consume()
            .map_err(|()| FetchError::Connection("response body already taken".into()))?;
        let body = Self::read_body(body)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
