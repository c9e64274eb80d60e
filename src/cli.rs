//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Strava MCP server - activities, segments and leaderboards over MCP
#[derive(Parser, Debug)]
#[command(name = "strava-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "STRAVA_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "STRAVA_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "STRAVA_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server on stdio (default)
    Serve,

    /// Run the browser authorization flow and print the refresh token
    Auth {
        /// Also write `STRAVA_REFRESH_TOKEN=...` to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not try to open a browser; only log the consent URL
        #[arg(long)]
        no_browser: bool,
    },
}
