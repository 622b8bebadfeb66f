//! HTTP transport and response classification
//!
//! A transport performs exactly one HTTP exchange. [`classify`] turns what
//! came back into an [`AttemptOutcome`] once, so everything downstream
//! switches on the tag instead of re-reading status codes or messages.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

use super::types::{ApiRequest, AttemptOutcome, Method, RawResponse};

/// Wait used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Body message marker for a misspelled or deleted field
const FIELD_NOT_FOUND_MARKER: &str = "FieldNameNotFound";

/// Envelope code the Bitable API uses for the same condition
const FIELD_NOT_FOUND_CODE: i64 = 1254045;

/// Failure below HTTP: nothing usable came back
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Issues a single HTTP call
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest, bearer: &str) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport with a fixed per-attempt timeout
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storymap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, bearer: &str) -> Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("HTTP {} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .header("Authorization", bearer)
            .header("Content-Type", "application/json; charset=utf-8")
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Classify one HTTP exchange
pub fn classify(raw: &RawResponse) -> AttemptOutcome {
    match raw.status {
        401 => return AttemptOutcome::AuthError,
        429 => {
            return AttemptOutcome::RateLimited {
                retry_after: parse_retry_after(raw.retry_after.as_deref())
                    .unwrap_or(DEFAULT_RETRY_AFTER),
            }
        }
        s if s >= 500 => return AttemptOutcome::ServerError { status: s },
        200 => {}
        s => return AttemptOutcome::UnknownError(format!("HTTP {s}: {}", truncate(&raw.body))),
    }

    let envelope: Envelope = match serde_json::from_str(&raw.body) {
        Ok(envelope) => envelope,
        Err(_) => return AttemptOutcome::UnknownError("invalid JSON response".to_string()),
    };

    if envelope.code == 0 {
        let data = envelope
            .data
            .unwrap_or_else(|| Value::Object(Default::default()));
        return AttemptOutcome::Success(data);
    }

    let message = if envelope.msg.is_empty() {
        format!("code {}", envelope.code)
    } else {
        envelope.msg
    };

    if envelope.code == FIELD_NOT_FOUND_CODE || message.contains(FIELD_NOT_FOUND_MARKER) {
        AttemptOutcome::FieldError(message)
    } else {
        AttemptOutcome::UnknownError(format!("[{}] {message}", envelope.code))
    }
}

/// Transport-level failures are always network errors
pub fn classify_error(error: &TransportError) -> AttemptOutcome {
    AttemptOutcome::NetworkError(error.to_string())
}

/// `Retry-After` is either delta-seconds or an HTTP date
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let value = value?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

fn truncate(body: &str) -> &str {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_driven_classification() {
        assert_eq!(classify(&RawResponse::new(401, "")), AttemptOutcome::AuthError);
        assert_eq!(
            classify(&RawResponse::new(503, "")),
            AttemptOutcome::ServerError { status: 503 }
        );
        assert!(matches!(
            classify(&RawResponse::new(404, "not here")),
            AttemptOutcome::UnknownError(msg) if msg.contains("404")
        ));
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let raw = RawResponse::new(429, "").with_retry_after("5");
        assert_eq!(
            classify(&raw),
            AttemptOutcome::RateLimited {
                retry_after: Duration::from_secs(5)
            }
        );

        assert_eq!(
            classify(&RawResponse::new(429, "")),
            AttemptOutcome::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );

        let garbage = RawResponse::new(429, "").with_retry_after("soon");
        assert_eq!(
            classify(&garbage),
            AttemptOutcome::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[test]
    fn test_envelope_success_returns_data() {
        let raw = RawResponse::new(200, r#"{"code":0,"msg":"success","data":{"has_more":false}}"#);
        assert_eq!(
            classify(&raw),
            AttemptOutcome::Success(serde_json::json!({"has_more": false}))
        );
    }

    #[test]
    fn test_envelope_field_error() {
        let raw = RawResponse::new(200, r#"{"code":1254045,"msg":"FieldNameNotFound"}"#);
        assert!(matches!(classify(&raw), AttemptOutcome::FieldError(_)));

        let by_message =
            RawResponse::new(200, r#"{"code":99,"msg":"FieldNameNotFound: Story.No"}"#);
        assert!(matches!(classify(&by_message), AttemptOutcome::FieldError(_)));
    }

    #[test]
    fn test_envelope_other_error_is_unknown() {
        let raw = RawResponse::new(200, r#"{"code":91402,"msg":"NOTEXIST"}"#);
        assert!(matches!(
            classify(&raw),
            AttemptOutcome::UnknownError(msg) if msg.contains("91402")
        ));
        assert!(matches!(
            classify(&RawResponse::new(200, "not json")),
            AttemptOutcome::UnknownError(_)
        ));
    }

    #[test]
    fn test_transport_error_is_network() {
        assert!(matches!(
            classify_error(&TransportError::Timeout),
            AttemptOutcome::NetworkError(_)
        ));
    }

    #[test]
    fn test_retry_after_http_date_in_past_is_zero() {
        let parsed = parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parsed, Some(Duration::ZERO));
    }
}
