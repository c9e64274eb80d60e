//! OAuth Callback Listener
//!
//! A short-lived local HTTP server that sends the user to the consent page and
//! receives the authorization code afterwards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::exchange::TokenGrant;
use super::flow::{FlowState, SharedFlowState};
use super::pending::{ExchangeResolver, Settlement};
use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// Scopes the user actually granted
    pub scope: Option<String>,

    /// Error code (e.g. `access_denied`)
    pub error: Option<String>,
}

/// Everything the routes need for one flow
pub struct CallbackRoutes {
    /// Provider consent URL that `/auth` redirects to
    pub consent_url: String,
    /// Path receiving the provider redirect
    pub callback_path: String,
    /// Exchanges the received code
    pub grant: Arc<dyn TokenGrant>,
    /// Settles the flow's pending exchange
    pub resolver: ExchangeResolver,
    /// Flow state, advanced to `Exchanging` when a code arrives
    pub flow_state: SharedFlowState,
}

/// State shared with the route handlers
struct RouteState {
    consent_url: String,
    grant: Arc<dyn TokenGrant>,
    resolver: ExchangeResolver,
    flow_state: SharedFlowState,
    // Serializes callbacks so racing redirects cannot both exchange
    exchange_gate: tokio::sync::Mutex<()>,
}

/// Bound but not yet serving listener
pub struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Bind `addr`; port 0 picks a free port
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::ListenerStartup {
                addr: addr.to_string(),
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| Error::ListenerStartup {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, addr })
    }

    /// Actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start serving the consent and callback routes
    pub fn serve(self, routes: CallbackRoutes) -> ListenerHandle {
        let state = Arc::new(RouteState {
            consent_url: routes.consent_url,
            grant: routes.grant,
            resolver: routes.resolver,
            flow_state: routes.flow_state,
            exchange_gate: tokio::sync::Mutex::new(()),
        });

        let app = Router::new()
            .route("/", get(|| async { Redirect::temporary("/auth") }))
            .route("/auth", get(handle_auth))
            .route(&routes.callback_path, get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let addr = self.addr;
        let listener = self.listener;

        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "OAuth callback server error");
            }
        });

        info!(%addr, "OAuth callback listener started");

        ListenerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Running listener; dropping it aborts the server task
pub struct ListenerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down gracefully, abandoning the shutdown after `grace`
    pub async fn stop(mut self, grace: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };

        if tokio::time::timeout(grace, &mut task).await.is_ok() {
            info!(addr = %self.addr, "OAuth callback listener stopped");
        } else {
            warn!(
                addr = %self.addr,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "OAuth callback listener did not stop in time, aborting"
            );
            task.abort();
            // Wait for the abort so the socket is closed on return
            let _ = task.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(addr = %self.addr, "Aborting OAuth callback listener");
            task.abort();
        }
    }
}

/// Redirect to the provider's consent page
async fn handle_auth(State(state): State<Arc<RouteState>>) -> Redirect {
    debug!("Redirecting to consent page");
    Redirect::temporary(&state.consent_url)
}

/// Handle the provider redirect
async fn handle_callback(
    State(state): State<Arc<RouteState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let _gate = state.exchange_gate.lock().await;

    if let Some(settlement) = state.resolver.settlement() {
        debug!("Callback after settlement, re-rendering result");
        return render_settlement(&settlement);
    }

    if let Some(error) = params.error {
        warn!(error = %error, "Authorization denied by provider");
        let page = failure_page(&format!("The provider reported: {error}"));
        if !state.resolver.reject(Error::AuthorizationDenied(error)) {
            return render_current(&state.resolver);
        }
        return (StatusCode::BAD_REQUEST, Html(page)).into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        warn!("Callback without authorization code");
        return (
            StatusCode::BAD_REQUEST,
            Html(failure_page("No authorization code was provided.")),
        )
            .into_response();
    };

    debug!(scope = ?params.scope, "Received authorization code");
    *state.flow_state.lock() = FlowState::Exchanging;

    let won = match state.grant.exchange_code(&code).await {
        Ok(tokens) => state.resolver.resolve(tokens),
        Err(e) => {
            warn!(error = %e, "Authorization code exchange failed");
            state.resolver.reject(e)
        }
    };
    if !won {
        warn!("Exchange finished after the flow had already settled, discarding its result");
    }
    render_current(&state.resolver)
}

/// Page for whichever settlement took effect
fn render_current(resolver: &ExchangeResolver) -> Response {
    let settlement = resolver
        .settlement()
        .unwrap_or_else(|| Settlement::Failed("exchange not settled".to_string()));
    render_settlement(&settlement)
}

fn render_settlement(settlement: &Settlement) -> Response {
    match settlement {
        Settlement::Succeeded => (StatusCode::OK, Html(success_page())).into_response(),
        Settlement::Failed(_) => (
            StatusCode::BAD_REQUEST,
            Html(failure_page("An error occurred. Please check the logs.")),
        )
            .into_response(),
    }
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #fc4c02;
            color: white;
        }
        .container { text-align: center; padding: 2rem; }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization successful!</h1>
        <p>You can close this tab and return to the application.</p>
    </div>
    <script>setTimeout(() => window.close(), 3000);</script>
</body>
</html>"#
        .to_string()
}

fn failure_page(message: &str) -> String {
    let message = html_escape::encode_text(message);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #c0392b;
            color: white;
        }}
        .container {{ text-align: center; padding: 2rem; max-width: 400px; }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        p {{ margin: 0; opacity: 0.9; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization failed!</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#
    )
}
