//! OAuth 2.0 authorization-code flow for the Strava API
//!
//! Features:
//! - One-shot local callback listener (`/auth`, `/exchange_token`)
//! - Resolve-once correlation between the waiting caller and the callback
//! - Code exchange and refresh against the token endpoint
//! - Single-flight browser flow with bounded timeouts
//! - In-memory access-token cache with refresh-token rotation

mod cache;
mod exchange;
mod flow;
mod listener;
mod pending;
mod tokens;

pub use cache::AccessTokenCache;
pub use exchange::{MAX_ERROR_BODY_CHARS, TokenExchanger, TokenGrant};
pub use flow::{
    FlowConfig, FlowOrchestrator, FlowState, LogOnly, SharedFlowState, SystemBrowser, UserAgent,
};
pub use listener::{CallbackListener, CallbackParams, CallbackRoutes, ListenerHandle};
pub use pending::{ExchangeResolver, ExchangeWaiter, PendingExchange, RejectOnDrop, Settlement};
pub use tokens::{AuthorizationRequest, CachedAccessToken, ClientCredentials, TokenSet};

/// Provider consent page
pub const AUTHORIZE_URL: &str = "https://www.strava.com/oauth/authorize";

/// Provider token endpoint
pub const TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Scopes needed by the exposed tools
pub const DEFAULT_SCOPE: &str = "read_all,activity:read,activity:read_all,profile:read_all";
