//! OAuth token and credential types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Application credentials registered with the provider
#[derive(Clone)]
pub struct ClientCredentials {
    /// Client ID
    pub client_id: String,
    /// Client secret (never logged)
    pub client_secret: String,
}

impl ClientCredentials {
    /// Create credentials
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Tokens returned by a code exchange or refresh
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer credential for REST calls
    pub access_token: String,
    /// Refresh credential; `None` on a refresh response means "keep the current one"
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token
    pub expires_at: DateTime<Utc>,
    /// Lifetime as reported by the provider
    pub expires_in: Duration,
    /// Token type (usually "Bearer")
    pub token_type: String,
}

impl TokenSet {
    /// Access token paired with its expiry
    pub fn cached_access_token(&self) -> CachedAccessToken {
        CachedAccessToken {
            token: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Access token held by the cache
#[derive(Clone, PartialEq, Eq)]
pub struct CachedAccessToken {
    /// Bearer credential
    pub token: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    /// Whether the token may still be presented at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for CachedAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One consent request, rendered into the provider's authorize URL
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Where the provider sends the user back
    pub redirect_uri: String,
    /// Comma-separated scopes
    pub scope: String,
    /// Strava's `approval_prompt` ("force" always shows the consent screen)
    pub approval_prompt: String,
}

impl AuthorizationRequest {
    /// Create a request that always prompts for approval
    pub fn new(redirect_uri: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            approval_prompt: "force".to_string(),
        }
    }

    /// Build the consent URL for `client_id`
    pub fn consent_url(&self, authorize_url: &str, client_id: &str) -> Result<String> {
        let mut url = Url::parse(authorize_url)
            .map_err(|e| Error::Config(format!("Invalid authorize URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("approval_prompt", &self.approval_prompt)
            .append_pair("scope", &self.scope);

        Ok(url.into())
    }
}
