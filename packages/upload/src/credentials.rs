//! Bearer credentials for asset service requests.
//!
//! Every request asks a [`CredentialProvider`] for a token. Permanent tokens
//! are returned as-is; OAuth tokens are held by [`RefreshingCredentials`],
//! which refreshes shortly before expiry. The refresh is single-flight: the
//! token lives behind a `tokio::sync::Mutex` that stays locked for the
//! duration of the refresh, so concurrent callers wait and then observe the
//! same new token.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::UploadError;

/// Tokens expiring within this window are refreshed before use.
pub const EXPIRY_MARGIN: TimeDelta = TimeDelta::seconds(15);

/// Source of a valid bearer token, resolved per request.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a token that is valid right now.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Credentials`] if no valid token can be
    /// obtained.
    async fn bearer_token(&self) -> Result<String, UploadError>;
}

/// A non-expiring token.
#[derive(Debug, Clone)]
pub struct PermanentToken(String);

impl PermanentToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for PermanentToken {
    async fn bearer_token(&self) -> Result<String, UploadError> {
        Ok(self.0.clone())
    }
}

/// An OAuth2 access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Whether the access token expires within [`EXPIRY_MARGIN`] of `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= EXPIRY_MARGIN
    }
}

/// Exchanges a refresh token for a new [`Token`].
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`UploadError`] if the exchange fails.
    async fn refresh(&self, refresh_token: &str) -> Result<Token, UploadError>;
}

/// Invoked with every newly refreshed token, e.g. to persist it.
pub type RefreshCallback = Box<dyn Fn(&Token) + Send + Sync>;

/// Holds an OAuth token and refreshes it when it is about to expire.
pub struct RefreshingCredentials<R> {
    refresher: R,
    token: Mutex<Token>,
    on_refresh: Option<RefreshCallback>,
}

impl<R: TokenRefresher> RefreshingCredentials<R> {
    #[must_use]
    pub fn new(refresher: R, token: Token) -> Self {
        Self {
            refresher,
            token: Mutex::new(token),
            on_refresh: None,
        }
    }

    /// Registers a callback run after each successful refresh.
    #[must_use]
    pub fn on_refresh(mut self, callback: impl Fn(&Token) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Box::new(callback));
        self
    }
}

#[async_trait]
impl<R: TokenRefresher> CredentialProvider for RefreshingCredentials<R> {
    async fn bearer_token(&self) -> Result<String, UploadError> {
        let mut token = self.token.lock().await;
        if token.needs_refresh(Utc::now()) {
            log::debug!("Access token expires at {}, refreshing", token.expires_at);
            let refreshed = self.refresher.refresh(&token.refresh_token).await?;
            if let Some(callback) = &self.on_refresh {
                callback(&refreshed);
            }
            *token = refreshed;
        }
        Ok(token.access_token.clone())
    }
}

/// Refresh path of the OAuth2 token endpoint, relative to the base URL.
const TOKEN_ROUTE: &str = "v6/authentication/oauth2/token";

/// [`TokenRefresher`] using the service's OAuth2 `refresh_token` grant.
pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

impl OAuthRefresher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}/{TOKEN_ROUTE}", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Token, UploadError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Credentials {
                message: format!("token refresh failed with HTTP {}: {body}", status.as_u16()),
            });
        }

        let body: TokenResponse = response.json().await?;
        log::info!("Refreshed access token (expires in {}s)", body.expires_in);

        Ok(Token {
            access_token: body.access_token,
            refresh_token: body
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at: Utc::now() + TimeDelta::seconds(body.expires_in),
        })
    }
}
