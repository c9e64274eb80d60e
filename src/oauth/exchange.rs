//! Token endpoint client
//!
//! The two grants Strava's `/oauth/token` endpoint accepts: an authorization
//! code and a refresh token. Neither retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::tokens::{ClientCredentials, TokenSet};
use crate::{Error, Result};

/// Maximum number of characters of an upstream error body kept in errors
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Upstream grants used by the flow and the cache
#[async_trait]
pub trait TokenGrant: Send + Sync {
    /// Exchange an authorization code; the response must carry a refresh token
    async fn exchange_code(&self, code: &str) -> Result<TokenSet>;

    /// Mint a new access token from a refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet>;
}

/// Raw token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<u64>,
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, now: DateTime<Utc>) -> Result<TokenSet> {
        if self.access_token.is_empty() {
            return Err(Error::InvalidTokenResponse(
                "empty access_token".to_string(),
            ));
        }

        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(epoch), _) => DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
                Error::InvalidTokenResponse(format!("expires_at out of range: {epoch}"))
            })?,
            (None, Some(secs)) => {
                let delta = i64::try_from(secs)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(|| {
                        Error::InvalidTokenResponse(format!("expires_in out of range: {secs}"))
                    })?;
                now + delta
            }
            (None, None) => {
                return Err(Error::InvalidTokenResponse(
                    "neither expires_at nor expires_in present".to_string(),
                ));
            }
        };

        let expires_in = match self.expires_in {
            Some(secs) => Duration::from_secs(secs),
            None => (expires_at - now).to_std().unwrap_or_default(),
        };

        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            expires_in,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        })
    }
}

/// HTTP client for the provider's token endpoint
pub struct TokenExchanger {
    http_client: Client,
    credentials: ClientCredentials,
    token_url: String,
}

impl TokenExchanger {
    /// Create an exchanger posting to `token_url`
    pub fn new(http_client: Client, credentials: ClientCredentials, token_url: impl Into<String>) -> Self {
        Self {
            http_client,
            credentials,
            token_url: token_url.into(),
        }
    }

    /// Client ID used for both grants
    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    async fn post_grant(&self, grant: &[(&str, &str)]) -> Result<TokenSet> {
        let mut params = vec![
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        params.extend_from_slice(grant);

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = sanitize_error_body(&body, &self.credentials.client_secret);
            warn!(status = status.as_u16(), body = %body, "Token endpoint rejected request");
            return Err(Error::UpstreamAuth {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidTokenResponse(e.to_string()))?;
        parsed.into_token_set(Utc::now())
    }
}

#[async_trait]
impl TokenGrant for TokenExchanger {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        debug!("Exchanging authorization code");
        let tokens = self
            .post_grant(&[("code", code), ("grant_type", "authorization_code")])
            .await?;

        if tokens.refresh_token.is_none() {
            return Err(Error::InvalidTokenResponse(
                "code exchange response has no refresh_token".to_string(),
            ));
        }

        info!(expires_at = %tokens.expires_at, "Authorization code exchanged");
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        debug!("Refreshing access token");
        let tokens = self
            .post_grant(&[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        let rotated = tokens
            .refresh_token
            .as_deref()
            .is_some_and(|t| t != refresh_token);
        info!(expires_at = %tokens.expires_at, rotated, "Access token refreshed");
        Ok(tokens)
    }
}

/// Redact the client secret and cap the length of an upstream error body
pub(crate) fn sanitize_error_body(body: &str, secret: &str) -> String {
    let redacted = if secret.is_empty() {
        body.to_string()
    } else {
        body.replace(secret, "<redacted>")
    };

    if redacted.chars().count() <= MAX_ERROR_BODY_CHARS {
        return redacted;
    }
    let mut truncated: String = redacted.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}
