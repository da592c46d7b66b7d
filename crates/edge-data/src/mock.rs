//! Scripted upstream for tests and local dry runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::{FetchError, Upstream, UpstreamRequest, UpstreamResponse};

#[derive(Debug, Clone)]
enum Reply {
    Respond(UpstreamResponse),
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<String, Reply>,
    requests: Vec<UpstreamRequest>,
    delay: Duration,
}

/// Upstream that answers from a per-URL script and records every request.
///
/// Unscripted URLs answer `404`. Clones share the script and the log.
#[derive(Debug, Clone, Default)]
pub struct MockUpstream {
    state: Arc<Mutex<MockState>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: impl Into<String>, response: UpstreamResponse) {
        self.state()
            .replies
            .insert(url.into(), Reply::Respond(response));
    }

    /// Fail requests to `url` with a connection error.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.state()
            .replies
            .insert(url.into(), Reply::Fail(message.into()));
    }

    /// Delay every answer.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Total requests received.
    pub fn calls(&self) -> usize {
        self.state().requests.len()
    }

    /// Requests received for `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.state().requests.clone()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let (reply, delay) = {
            let mut state = self.state();
            let reply = state.replies.get(&request.url).cloned();
            state.requests.push(request);
            (reply, state.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(FetchError::Connection(message)),
            None => Ok(UpstreamResponse::new(404, "no scripted response")),
        }
    }
}
