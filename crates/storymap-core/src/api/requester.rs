//! Retrying request execution
//!
//! Every attempt goes through the rate limiter and picks up a fresh
//! credential before hitting the transport. Ordinary failures come back as
//! an [`AttemptOutcome`]; only token exhaustion is an `Err`.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{classify, classify_error, Transport};
use super::types::{ApiRequest, AttemptOutcome};
use crate::auth::TokenStore;
use crate::error::AuthExhausted;

/// Running counters, for observability only
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestMetrics {
    /// Logical calls to `execute`
    pub requests_total: u64,
    /// Logical calls whose final outcome was a failure
    pub requests_failed: u64,
    /// Individual HTTP attempts
    pub attempts_total: u64,
    pub attempts_failed: u64,
    /// Mean attempt latency in milliseconds
    pub avg_response_ms: f64,
}

impl RequestMetrics {
    fn record_attempt(&mut self, latency: Duration, success: bool) {
        self.attempts_total += 1;
        if !success {
            self.attempts_failed += 1;
        }
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let n = self.attempts_total as f64;
        self.avg_response_ms += (latency_ms - self.avg_response_ms) / n;
    }

    fn record_request(&mut self, success: bool) {
        self.requests_total += 1;
        if !success {
            self.requests_failed += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.requests_total.max(1) as f64;
        (self.requests_total - self.requests_failed) as f64 / total
    }
}

pub struct RetryingRequester {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    metrics: Mutex<RequestMetrics>,
}

impl RetryingRequester {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter,
            policy,
            metrics: Mutex::new(RequestMetrics::default()),
        }
    }

    /// Run `request` until it succeeds, fails non-retryably, or runs out of attempts
    pub async fn execute(&self, request: &ApiRequest) -> Result<AttemptOutcome, AuthExhausted> {
        let total_attempts = self.policy.total_attempts();
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire().await;
            let credential = self.tokens.get_valid_credential().await?;

            let started = Instant::now();
            let outcome = match self.transport.send(request, &credential.bearer()).await {
                Ok(raw) => classify(&raw),
                Err(e) => classify_error(&e),
            };
            self.metrics
                .lock()
                .record_attempt(started.elapsed(), outcome.is_success());

            if outcome.is_success() {
                debug!(attempt = attempt + 1, "{} {} succeeded", request.method, request.path);
                self.metrics.lock().record_request(true);
                return Ok(outcome);
            }

            if matches!(outcome, AttemptOutcome::AuthError) {
                self.tokens.invalidate(credential.token()).await;
            }

            let exhausted = attempt + 1 >= total_attempts;
            if !outcome.is_retryable() || exhausted {
                if exhausted && outcome.is_retryable() {
                    error!(
                        attempts = attempt + 1,
                        "{} {} failed after all retries: {}",
                        request.method,
                        request.path,
                        outcome.describe()
                    );
                } else {
                    error!(
                        "{} {} failed and will not be retried: {}",
                        request.method,
                        request.path,
                        outcome.describe()
                    );
                }
                self.metrics.lock().record_request(false);
                return Ok(outcome);
            }

            let delay = self.policy.delay_for(attempt, outcome.retry_after());
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                kind = %outcome.error_kind().map(|k| k.to_string()).unwrap_or_default(),
                "{} {} failed, retrying: {}",
                request.method,
                request.path,
                outcome.describe()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn metrics(&self) -> RequestMetrics {
        self.metrics.lock().clone()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
