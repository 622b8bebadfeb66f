//! Request/response types shared by the transport, requester and paginator

use serde_json::Value;
use std::time::Duration;

/// HTTP method subset the Bitable API uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// One logical API call, replayable across retry attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API base URL, e.g. `/bitable/v1/apps/{app}/tables/{table}/records`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Unclassified HTTP response as the transport saw it
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if any
    pub retry_after: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Tag of a failed attempt, for logging and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    RateLimited,
    Field,
    Network,
    Server,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Field => "field",
            ErrorKind::Network => "network",
            ErrorKind::Server => "server",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Result of one HTTP attempt, classified once at the HTTP boundary
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The envelope's `data` object
    Success(Value),
    AuthError,
    RateLimited { retry_after: Duration },
    FieldError(String),
    NetworkError(String),
    ServerError { status: u16 },
    UnknownError(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }

    /// Transient faults worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::AuthError
                | AttemptOutcome::RateLimited { .. }
                | AttemptOutcome::NetworkError(_)
                | AttemptOutcome::ServerError { .. }
        )
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptOutcome::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::AuthError => Some(ErrorKind::Auth),
            AttemptOutcome::RateLimited { .. } => Some(ErrorKind::RateLimited),
            AttemptOutcome::FieldError(_) => Some(ErrorKind::Field),
            AttemptOutcome::NetworkError(_) => Some(ErrorKind::Network),
            AttemptOutcome::ServerError { .. } => Some(ErrorKind::Server),
            AttemptOutcome::UnknownError(_) => Some(ErrorKind::Unknown),
        }
    }

    /// Consume into the success payload, or a human-readable failure
    pub fn into_data(self) -> Result<Value, String> {
        match self {
            AttemptOutcome::Success(data) => Ok(data),
            other => Err(other.describe()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AttemptOutcome::Success(_) => "success".to_string(),
            AttemptOutcome::AuthError => "authentication failed".to_string(),
            AttemptOutcome::RateLimited { retry_after } => {
                format!("rate limited (retry after {}s)", retry_after.as_secs())
            }
            AttemptOutcome::FieldError(msg) => format!("field error: {msg}"),
            AttemptOutcome::NetworkError(msg) => format!("network error: {msg}"),
            AttemptOutcome::ServerError { status } => format!("server error: HTTP {status}"),
            AttemptOutcome::UnknownError(msg) => format!("API error: {msg}"),
        }
    }
}
