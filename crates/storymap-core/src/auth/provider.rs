//! Token endpoint access
//!
//! The store only needs "give me a fresh token"; the HTTP details of the
//! tenant token endpoint live here behind [`TokenProvider`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::TokenError;

/// Lifetime assumed when the endpoint omits `expire`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 7200;

const TENANT_TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";

/// A token as issued by the endpoint, before the store stamps an expiry instant
#[derive(Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of fresh access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Make one call to the token endpoint. Retrying is the caller's job.
    async fn issue_token(&self) -> Result<IssuedToken, TokenError>;
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<u64>,
}

/// Issues tenant access tokens from an app id / secret pair
pub struct LarkTokenProvider {
    client: reqwest::Client,
    token_url: String,
    app_id: String,
    app_secret: String,
}

impl LarkTokenProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TENANT_TOKEN_PATH),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for LarkTokenProvider {
    async fn issue_token(&self) -> Result<IssuedToken, TokenError> {
        debug!("Requesting tenant access token for app {}", self.app_id);

        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let response = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Http {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;
        parse_token_response(&text)
    }
}

/// Interpret a token endpoint body. Success requires `code == 0` and a token.
pub(crate) fn parse_token_response(body: &str) -> Result<IssuedToken, TokenError> {
    let parsed: TenantTokenResponse =
        serde_json::from_str(body).map_err(|e| TokenError::Malformed(e.to_string()))?;

    if parsed.code != 0 {
        return Err(TokenError::Rejected {
            code: parsed.code,
            message: if parsed.msg.is_empty() {
                "unknown auth error".to_string()
            } else {
                parsed.msg
            },
        });
    }

    let access_token = parsed
        .tenant_access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TokenError::Malformed("missing tenant_access_token".to_string()))?;

    Ok(IssuedToken {
        access_token,
        expires_in: Duration::from_secs(parsed.expire.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)),
    })
}
