//! Browser authorization flow
//!
//! Drives one authorization-code round trip at a time:
//! `Idle → Starting → AwaitingCallback → Exchanging → Done → Idle`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::exchange::TokenGrant;
use super::listener::{CallbackListener, CallbackRoutes};
use super::pending::{PendingExchange, RejectOnDrop};
use super::tokens::{AuthorizationRequest, TokenSet};
use crate::config::OAuthConfig;
use crate::{Error, Result};

/// Phase of the authorization flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No flow running
    Idle,
    /// Binding the listener
    Starting,
    /// Waiting for the user to finish consent
    AwaitingCallback,
    /// Code received, exchanging it for tokens
    Exchanging,
    /// Settled, tearing down
    Done,
}

/// Flow state shared with the callback route
pub type SharedFlowState = Arc<Mutex<FlowState>>;

/// Settings for the browser flow
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Listener address
    pub bind_addr: SocketAddr,
    /// Redirect path
    pub callback_path: String,
    /// Requested scopes
    pub scope: String,
    /// Provider consent page
    pub authorize_url: String,
    /// Time allowed for the user to complete consent
    pub callback_timeout: Duration,
    /// Upper bound on listener shutdown
    pub shutdown_timeout: Duration,
}

impl FlowConfig {
    /// Derive from the `oauth` configuration section
    pub fn from_oauth(config: &OAuthConfig) -> Result<Self> {
        Ok(Self {
            bind_addr: config.bind_addr()?,
            callback_path: config.callback_path.clone(),
            scope: config.scope.clone(),
            authorize_url: config.authorize_url.clone(),
            callback_timeout: config.callback_timeout,
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

/// Something that can show the consent page to the user
pub trait UserAgent: Send + Sync {
    /// Open `url`; failures are reported but never fatal to the flow
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Opens the system's default browser
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

/// Only logs the URL, for headless environments
pub struct LogOnly;

impl UserAgent for LogOnly {
    fn open(&self, url: &str) -> io::Result<()> {
        info!(url = %url, "Open this URL in a browser to authorize");
        Ok(())
    }
}

/// Resets the flow to `Idle` on every exit path
struct FlowGuard {
    state: SharedFlowState,
}

impl FlowGuard {
    fn acquire(state: &SharedFlowState) -> Result<Self> {
        let mut current = state.lock();
        if *current != FlowState::Idle {
            return Err(Error::FlowAlreadyInProgress);
        }
        *current = FlowState::Starting;
        Ok(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        *self.state.lock() = FlowState::Idle;
    }
}

/// Single-flight coordinator for the browser authorization flow
pub struct FlowOrchestrator {
    config: FlowConfig,
    client_id: String,
    grant: Arc<dyn TokenGrant>,
    user_agent: Arc<dyn UserAgent>,
    state: SharedFlowState,
}

impl FlowOrchestrator {
    /// Create an idle orchestrator
    pub fn new(
        config: FlowConfig,
        client_id: impl Into<String>,
        grant: Arc<dyn TokenGrant>,
        user_agent: Arc<dyn UserAgent>,
    ) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            grant,
            user_agent,
            state: Arc::new(Mutex::new(FlowState::Idle)),
        }
    }

    /// Current phase
    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    /// Run the flow and return the refresh token
    pub async fn get_refresh_token_via_browser_flow(&self) -> Result<String> {
        let tokens = self.authorize().await?;
        tokens.refresh_token.ok_or_else(|| {
            Error::InvalidTokenResponse("code exchange response has no refresh_token".to_string())
        })
    }

    /// Run the flow and return every token minted by the code exchange
    ///
    /// Fails immediately with `FlowAlreadyInProgress` if a flow is running.
    pub async fn authorize(&self) -> Result<TokenSet> {
        let _guard = FlowGuard::acquire(&self.state)?;

        let listener = CallbackListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr();
        let redirect_uri = format!("http://{addr}{}", self.config.callback_path);

        let request = AuthorizationRequest::new(redirect_uri, self.config.scope.clone());
        let consent_url = request.consent_url(&self.config.authorize_url, &self.client_id)?;

        let (resolver, waiter) = PendingExchange::create();
        let _cancel = RejectOnDrop::new(resolver.clone());

        let handle = listener.serve(CallbackRoutes {
            consent_url: consent_url.clone(),
            callback_path: self.config.callback_path.clone(),
            grant: Arc::clone(&self.grant),
            resolver,
            flow_state: Arc::clone(&self.state),
        });
        *self.state.lock() = FlowState::AwaitingCallback;

        info!(
            url = %format!("http://{addr}/auth"),
            timeout_secs = self.config.callback_timeout.as_secs(),
            "Waiting for Strava authorization"
        );
        if let Err(e) = self.user_agent.open(&consent_url) {
            warn!(error = %e, url = %consent_url, "Failed to open browser automatically, open the URL manually");
        }

        let outcome = waiter.await_result(self.config.callback_timeout).await;
        *self.state.lock() = FlowState::Done;

        handle.stop(self.config.shutdown_timeout).await;

        match &outcome {
            Ok(tokens) => info!(expires_at = %tokens.expires_at, "Authorization flow completed"),
            Err(e) => warn!(error = %e, "Authorization flow failed"),
        }
        outcome
    }
}
