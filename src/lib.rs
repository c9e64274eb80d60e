//! Strava MCP Server Library
//!
//! Exposes a Strava athlete's activities, segments and leaderboards as MCP
//! tools, with OAuth2 access tokens obtained and renewed transparently.
//!
//! # Features
//!
//! - **Browser authorization**: one-shot local callback listener that captures the
//!   authorization code and exchanges it for tokens
//! - **Token cache**: in-memory access token with single-flight refresh and
//!   refresh-token rotation
//! - **Strava REST client**: activities, segment efforts and leaderboards
//! - **MCP over stdio**: JSON-RPC 2.0 tool server
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 and 2025-03-26.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod strava;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr: stdout carries the MCP JSON-RPC stream.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Internal(format!("tracing init: {e}")))?;
        }
        _ => {
            subscriber
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Internal(format!("tracing init: {e}")))?;
        }
    }

    Ok(())
}
