//! Token storage with automatic refresh
//!
//! Holds the current credential and replaces it in place when it gets
//! within the safety buffer of expiry. The lock is held across the refresh,
//! so concurrent callers wait for the one in-flight refresh instead of
//! starting their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::provider::TokenProvider;
use crate::error::{AuthExhausted, TokenError};

/// Short-lived access credential
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the credential stays valid for at least `buffer` from now
    pub fn is_valid_for(&self, buffer: Duration) -> bool {
        Instant::now() + buffer < self.expires_at
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenStore {
    provider: Arc<dyn TokenProvider>,
    credential: Mutex<Option<Credential>>,
    refresh_attempts: u32,
    buffer: Duration,
    refreshes: AtomicU64,
}

impl TokenStore {
    pub fn new(provider: Arc<dyn TokenProvider>, refresh_attempts: u32, buffer: Duration) -> Self {
        Self {
            provider,
            credential: Mutex::new(None),
            refresh_attempts: refresh_attempts.max(1),
            buffer,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Get a credential valid for at least the safety buffer, refreshing if needed
    pub async fn get_valid_credential(&self) -> Result<Credential, AuthExhausted> {
        let mut guard = self.credential.lock().await;

        if let Some(credential) = guard.as_ref() {
            if credential.is_valid_for(self.buffer) {
                return Ok(credential.clone());
            }
            debug!("TokenStore: access token within refresh buffer, refreshing");
        } else {
            debug!("TokenStore: no access token held, requesting one");
        }

        let fresh = self.refresh_with_retry().await?;
        *guard = Some(fresh.clone());
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!("TokenStore: access token refreshed");

        Ok(fresh)
    }

    /// Drop the held credential if it is still the one that was rejected.
    ///
    /// A concurrent caller may already have replaced it; that newer
    /// credential is kept.
    pub async fn invalidate(&self, rejected_token: &str) {
        let mut guard = self.credential.lock().await;
        if guard.as_ref().is_some_and(|c| c.token == rejected_token) {
            warn!("TokenStore: access token rejected by API, forcing refresh");
            *guard = None;
        }
    }

    /// Whether a credential is held and outside the refresh buffer.
    /// Reports `false` while a refresh is in flight.
    pub fn has_valid_credential(&self) -> bool {
        match self.credential.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|c| c.is_valid_for(self.buffer)),
            Err(_) => false,
        }
    }

    /// Number of successful refreshes so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn refresh_with_retry(&self) -> Result<Credential, AuthExhausted> {
        let mut last_error: Option<TokenError> = None;

        for attempt in 0..self.refresh_attempts {
            debug!(attempt = attempt + 1, "TokenStore: requesting new access token");

            match self.provider.issue_token().await {
                Ok(issued) => {
                    if issued.expires_in <= self.buffer {
                        warn!(
                            "TokenStore: token lifetime {:?} is shorter than refresh buffer {:?}",
                            issued.expires_in, self.buffer
                        );
                    }
                    return Ok(Credential::new(
                        issued.access_token,
                        Instant::now() + issued.expires_in,
                    ));
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "TokenStore: token refresh failed");
                    last_error = Some(e);
                }
            }

            if attempt + 1 < self.refresh_attempts {
                sleep(Duration::from_secs(1u64 << attempt.min(16))).await;
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        error!(
            attempts = self.refresh_attempts,
            "TokenStore: giving up on access token refresh: {}", last_error
        );

        Err(AuthExhausted {
            attempts: self.refresh_attempts,
            last_error,
        })
    }
}
