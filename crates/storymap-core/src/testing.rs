//! Scripted fakes for the transport and token endpoint

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::api::{
    ApiRequest, RateLimiter, RawResponse, RetryPolicy, RetryingRequester, Transport,
    TransportError,
};
use crate::auth::{IssuedToken, TokenProvider, TokenStore};
use crate::error::TokenError;

type Handler = Box<dyn Fn(&ApiRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync>;

struct Call {
    request: ApiRequest,
    bearer: String,
    at: Instant,
}

/// Transport answering from a closure, recording every call
pub struct ScriptedTransport {
    handler: Handler,
    latency: Option<Duration>,
    log: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    /// Answer every call from `f(request, call_index)`
    pub fn route(
        f: impl Fn(&ApiRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(f),
            latency: None,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn always(
        f: impl Fn(&ApiRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self::route(move |request, _| f(request))
    }

    /// Play responses in order; calls past the end fail as network errors
    pub fn sequence(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::route(move |_, _| {
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".to_string())))
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.log.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().iter().map(|c| c.at).collect()
    }

    pub fn bearers(&self) -> Vec<String> {
        self.log.lock().iter().map(|c| c.bearer.clone()).collect()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().iter().map(|c| c.request.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, bearer: &str) -> Result<RawResponse, TransportError> {
        let index = {
            let mut log = self.log.lock();
            log.push(Call {
                request: request.clone(),
                bearer: bearer.to_string(),
                at: Instant::now(),
            });
            log.len() - 1
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.handler)(request, index)
    }
}

/// Token endpoint fake issuing `t-1`, `t-2`, ...
pub struct ScriptedTokenProvider {
    lifetime: Duration,
    latency: Option<Duration>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl ScriptedTokenProvider {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            latency: None,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `n` calls fail
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokenProvider {
    async fn issue_token(&self) -> Result<IssuedToken, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TokenError::Http { status: 503 });
        }

        Ok(IssuedToken {
            access_token: format!("t-{n}"),
            expires_in: self.lifetime,
        })
    }
}

pub fn requester_with(transport: Arc<dyn Transport>, policy: RetryPolicy) -> RetryingRequester {
    let provider = Arc::new(ScriptedTokenProvider::new(Duration::from_secs(7200)));
    requester_with_provider(transport, provider, policy)
}

pub fn requester_with_provider(
    transport: Arc<dyn Transport>,
    provider: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
) -> RetryingRequester {
    let tokens = Arc::new(TokenStore::new(provider, 3, Duration::from_secs(300)));
    RetryingRequester::new(transport, tokens, Arc::new(RateLimiter::disabled()), policy)
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
    }
}

/// A Bitable record with a text parent reference
pub fn record(id: &str, parent: &str) -> Value {
    json!({
        "record_id": id,
        "fields": { "Story.No": id, "parent": parent }
    })
}

/// Successful list-records envelope
pub fn records_page(
    items: Vec<Value>,
    has_more: bool,
    page_token: Option<&str>,
    total: Option<usize>,
) -> RawResponse {
    let mut data = json!({ "items": items, "has_more": has_more });
    if let Some(token) = page_token {
        data["page_token"] = json!(token);
    }
    if let Some(total) = total {
        data["total"] = json!(total);
    }
    RawResponse::new(200, json!({ "code": 0, "msg": "success", "data": data }).to_string())
}

pub fn ok_envelope(data: Value) -> RawResponse {
    RawResponse::new(200, json!({ "code": 0, "msg": "success", "data": data }).to_string())
}
