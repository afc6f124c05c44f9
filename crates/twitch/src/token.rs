use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::oauth::{OAuthError, TwitchOAuthClient};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// App access token plus the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_LEEWAY_SECS) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("client credentials exchange failed: {0}")]
    Exchange(#[from] OAuthError),
    #[error("identity endpoint returned an empty access token")]
    EmptyToken,
}

/// Owns the app access token shared by every upstream call.
///
/// Cloning is cheap; clones share the cached token.
#[derive(Clone)]
pub struct TokenProvider {
    oauth: TwitchOAuthClient,
    cached: Arc<RwLock<Option<AccessToken>>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl TokenProvider {
    pub fn new(oauth: TwitchOAuthClient) -> Self {
        Self {
            oauth,
            cached: Arc::new(RwLock::new(None)),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts from an already issued token instead of an empty cache.
    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.cached = Arc::new(RwLock::new(Some(token)));
        self
    }

    pub fn client_id(&self) -> &str {
        self.oauth.client_id()
    }

    /// Performs a fresh client-credentials exchange and caches the result.
    pub async fn acquire(&self) -> Result<AccessToken, TokenError> {
        let mut guard = self.cached.write().await;
        let token = self.exchange().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Returns the cached token, exchanging a new one when it is missing or
    /// about to expire.
    pub async fn token(&self) -> Result<AccessToken, TokenError> {
        let now = (self.clock)();
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.clone());
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh((self.clock)()) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token so the next [`TokenProvider::token`] call
    /// exchanges a new one.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }

    async fn exchange(&self) -> Result<AccessToken, TokenError> {
        let response = self.oauth.client_credentials().await?;
        if response.access_token.is_empty() {
            return Err(TokenError::EmptyToken);
        }

        let expires_at = response.expires_at((self.clock)());
        info!(stage = "oauth", expires_at = %expires_at.to_rfc3339(), "app access token acquired");
        Ok(AccessToken::new(response.access_token, expires_at))
    }
}
