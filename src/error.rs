//! Error types for the Strava MCP server

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the Strava MCP server
pub type Result<T> = std::result::Result<T, Error>;

/// Strava MCP errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The local callback listener could not bind its address
    #[error("Failed to start OAuth callback listener on {addr}: {source}")]
    ListenerStartup {
        /// Address that was requested
        addr: String,
        /// Underlying bind error
        #[source]
        source: io::Error,
    },

    /// The provider redirected back with an error instead of a code
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Non-success status from the token endpoint
    #[error("Token endpoint returned HTTP {status}: {body}")]
    UpstreamAuth {
        /// HTTP status code
        status: u16,
        /// Truncated, secret-redacted response body
        body: String,
    },

    /// Token endpoint answered with success but the body was unusable
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// No callback arrived within the authorization window
    #[error("Timed out after {0:?} waiting for the OAuth callback")]
    TimedOut(Duration),

    /// Another browser flow is already outstanding
    #[error("An OAuth authorization flow is already in progress")]
    FlowAlreadyInProgress,

    /// The flow was torn down before it completed
    #[error("OAuth flow was cancelled")]
    Cancelled,

    /// No refresh token and the interactive flow is disabled
    #[error("No refresh token available and interactive authorization is disabled")]
    MissingRefreshToken,

    /// All recovery paths for obtaining an access token failed
    #[error("Access token unavailable: {0}")]
    TokenUnavailable(#[source] Box<Error>),

    /// Strava REST API error
    #[error("Strava API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Invalid tool arguments
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
        }
    }

    /// Wrap a failure as the umbrella error returned by the token cache.
    ///
    /// An error that is already `TokenUnavailable` is returned unchanged.
    #[must_use]
    pub fn token_unavailable(cause: Self) -> Self {
        match cause {
            Self::TokenUnavailable(_) => cause,
            other => Self::TokenUnavailable(Box::new(other)),
        }
    }

    /// Root cause of a `TokenUnavailable` chain (or `self` otherwise)
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::TokenUnavailable(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::InvalidParams(_) => rpc_codes::INVALID_PARAMS,
            Self::TokenUnavailable(_) | Self::Api { .. } | Self::Http(_) => {
                rpc_codes::SERVER_ERROR_START
            }
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
}
