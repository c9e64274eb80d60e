//! Access-token cache
//!
//! Every outbound API call goes through [`AccessTokenCache::ensure_access_token`].
//! A valid cached token is returned under a synchronous read lock; renewal is
//! serialized behind one async gate so concurrent callers share one refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::exchange::TokenGrant;
use super::flow::FlowOrchestrator;
use super::tokens::{CachedAccessToken, TokenSet};
use crate::{Error, Result};

/// In-memory access token plus the refresh token it is renewed from
pub struct AccessTokenCache {
    cached: RwLock<Option<CachedAccessToken>>,
    refresh_token: RwLock<Option<String>>,
    gate: tokio::sync::Mutex<()>,
    grant: Arc<dyn TokenGrant>,
    flow: Option<Arc<FlowOrchestrator>>,
}

impl AccessTokenCache {
    /// Create an empty cache
    ///
    /// Without a `flow`, a missing refresh token fails with `MissingRefreshToken`
    /// instead of starting the browser authorization.
    pub fn new(
        grant: Arc<dyn TokenGrant>,
        refresh_token: Option<String>,
        flow: Option<Arc<FlowOrchestrator>>,
    ) -> Self {
        Self {
            cached: RwLock::new(None),
            refresh_token: RwLock::new(refresh_token),
            gate: tokio::sync::Mutex::new(()),
            grant,
            flow,
        }
    }

    /// Return a valid access token, refreshing or authorizing if needed
    ///
    /// Failures are wrapped in `TokenUnavailable`; an expired token is never returned.
    pub async fn ensure_access_token(&self) -> Result<String> {
        if let Some(token) = self.valid_token(Utc::now()) {
            return Ok(token);
        }

        let _gate = self.gate.lock().await;

        // Another caller may have renewed while we waited
        if let Some(token) = self.valid_token(Utc::now()) {
            debug!("Access token renewed by concurrent caller");
            return Ok(token);
        }

        self.renew().await.map_err(|e| {
            warn!(error = %e, "Unable to obtain access token");
            Error::token_unavailable(e)
        })
    }

    /// Current refresh token (after any rotation)
    pub fn refresh_token(&self) -> Option<String> {
        self.refresh_token.read().clone()
    }

    /// Bootstrap the cache with an access token obtained elsewhere
    ///
    /// Never replaces a cached token that expires later; returns whether the
    /// token was installed.
    pub fn seed(&self, token: impl Into<String>, expires_at: DateTime<Utc>) -> bool {
        let mut cached = self.cached.write();
        if cached.as_ref().is_some_and(|c| c.expires_at > expires_at) {
            debug!("Ignoring seed older than the cached access token");
            return false;
        }
        *cached = Some(CachedAccessToken {
            token: token.into(),
            expires_at,
        });
        true
    }

    /// Drop the cached access token so the next call renews it
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            debug!("Cached access token invalidated");
        }
    }

    /// Drop the cached access token only if it is still `token`
    ///
    /// A token installed by a concurrent renewal is kept.
    pub fn invalidate_if(&self, token: &str) -> bool {
        let mut cached = self.cached.write();
        if cached.as_ref().is_some_and(|c| c.token == token) {
            *cached = None;
            debug!("Rejected access token invalidated");
            return true;
        }
        false
    }

    /// Expiry of the cached access token, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cached.read().as_ref().map(|t| t.expires_at)
    }

    fn valid_token(&self, now: DateTime<Utc>) -> Option<String> {
        self.cached
            .read()
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .map(|t| t.token.clone())
    }

    async fn renew(&self) -> Result<String> {
        let current = self.refresh_token();

        let tokens = if let Some(refresh_token) = current {
            self.grant.refresh(&refresh_token).await?
        } else {
            let Some(flow) = &self.flow else {
                return Err(Error::MissingRefreshToken);
            };
            warn!("No refresh token available, starting browser authorization");
            flow.authorize().await?
        };

        Ok(self.adopt(tokens))
    }

    fn adopt(&self, tokens: TokenSet) -> String {
        if let Some(new_refresh) = tokens.refresh_token.as_ref() {
            let mut current = self.refresh_token.write();
            if current.as_deref() != Some(new_refresh.as_str()) {
                info!("Adopting new refresh token");
                *current = Some(new_refresh.clone());
            }
        }

        *self.cached.write() = Some(tokens.cached_access_token());
        tokens.access_token
    }
}
