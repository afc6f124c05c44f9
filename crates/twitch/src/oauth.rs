use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const TOKEN_PATH: &str = "token";
/// Upper bound on the lifetime accepted from the identity service.
const MAX_TOKEN_LIFETIME_SECS: i64 = 60 * 60 * 24 * 365;

/// App-only identity client: exchanges the client id and secret for an app
/// access token. There are no user tokens and no refresh tokens.
#[derive(Clone)]
pub struct TwitchOAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

#[derive(Serialize)]
struct ClientCredentialsGrant<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

/// Error body the identity service returns alongside a non-2xx status.
#[derive(Deserialize)]
struct IdentityErrorBody {
    message: String,
}

impl TwitchOAuthClient {
    /// `base_url` is the identity root (for example `https://id.twitch.tv/oauth2/`).
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Runs the client-credentials grant.
    pub async fn client_credentials(&self) -> Result<TokenResponse, OAuthError> {
        let grant = ClientCredentialsGrant {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "client_credentials",
        };
        let url = self.base_url.join(TOKEN_PATH)?;
        let response = self
            .http
            .post(url)
            .form(&grant)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<IdentityErrorBody>(&raw)
            .map(|body| body.message)
            .unwrap_or(raw);
        Err(OAuthError::Rejected { status, message })
    }
}

/// Successful client-credentials grant.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds as reported upstream.
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

impl TokenResponse {
    /// Absolute expiry for a token issued at `issued_at`. Lifetimes beyond a
    /// year are capped.
    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.expires_in)
            .unwrap_or(i64::MAX)
            .min(MAX_TOKEN_LIFETIME_SECS);
        issued_at
            .checked_add_signed(Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid token endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity service rejected the grant ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

impl OAuthError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Url(_) => None,
            Self::Http(err) => err.status(),
            Self::Rejected { status, .. } => Some(*status),
        }
    }
}
