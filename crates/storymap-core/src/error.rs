//! Terminal error types surfaced to callers
//!
//! Transient failures never show up here: they are retried inside the
//! requester and only their final outcome is reported.

use thiserror::Error;

/// Token refresh failed after every configured attempt.
///
/// Fatal for the current fetch cycle. Callers must not retry it in a loop;
/// escalation is their decision.
#[derive(Debug, Clone, Error)]
#[error("access token refresh failed after {attempts} attempts: {last_error}")]
pub struct AuthExhausted {
    pub attempts: u32,
    pub last_error: String,
}

/// A single failed call to the token endpoint
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("token endpoint unreachable: {0}")]
    Network(String),

    #[error("token endpoint returned HTTP {status}")]
    Http { status: u16 },

    #[error("token endpoint rejected credentials: [{code}] {message}")]
    Rejected { code: i64, message: String },

    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Why `fetch_tree` could not produce a tree at all
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    AuthExhausted(#[from] AuthExhausted),

    #[error("source unavailable: {reason}")]
    SourceUnavailable { reason: String },
}

impl FetchError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
        }
    }
}

/// Problems turning a user-supplied table reference into a [`TableSource`]
///
/// [`TableSource`]: crate::api::TableSource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("invalid table URL: {0}")]
    InvalidUrl(String),

    #[error("table URL has no wiki token in its path: {0}")]
    MissingWikiToken(String),

    #[error("table URL is missing the `table` query parameter: {0}")]
    MissingTableId(String),
}
