//! Strava MCP server
//!
//! Exposes Strava activities, segments and leaderboards as MCP tools on stdio.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use strava_mcp::{
    Result,
    cli::{Cli, Command},
    config::Config,
    oauth::{
        AccessTokenCache, ClientCredentials, FlowConfig, FlowOrchestrator, LogOnly,
        SystemBrowser, TokenExchanger, TokenGrant, UserAgent,
    },
    server::McpServer,
    setup_tracing,
    strava::StravaClient,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Auth { output, no_browser }) => {
            run_auth(&config, output.as_deref(), no_browser).await
        }
        Some(Command::Serve) | None => run_server(config).await,
    }
}

struct Components {
    grant: Arc<dyn TokenGrant>,
    flow: Arc<FlowOrchestrator>,
    http_client: reqwest::Client,
}

fn build_components(config: &Config, open_browser: bool) -> Result<Components> {
    let http_client = config.http.build_client()?;
    let credentials = ClientCredentials::new(&config.client_id, &config.client_secret);
    let grant: Arc<dyn TokenGrant> = Arc::new(TokenExchanger::new(
        http_client.clone(),
        credentials,
        &config.oauth.token_url,
    ));

    let user_agent: Arc<dyn UserAgent> = if open_browser {
        Arc::new(SystemBrowser)
    } else {
        Arc::new(LogOnly)
    };
    let flow = Arc::new(FlowOrchestrator::new(
        FlowConfig::from_oauth(&config.oauth)?,
        &config.client_id,
        Arc::clone(&grant),
        user_agent,
    ));

    Ok(Components {
        grant,
        flow,
        http_client,
    })
}

/// Run the MCP server on stdio
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        has_refresh_token = config.refresh_token.is_some(),
        interactive = config.oauth.interactive,
        "Starting Strava MCP server"
    );

    let components = match build_components(&config, config.oauth.open_browser) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to initialize: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.refresh_token.is_none() {
        if config.oauth.interactive {
            info!("No refresh token configured, the first tool call will start browser authorization");
        } else {
            warn!("No refresh token configured and interactive authorization is disabled");
        }
    }

    let flow = config.oauth.interactive.then_some(components.flow);
    let tokens = Arc::new(AccessTokenCache::new(
        components.grant,
        config.refresh_token.clone(),
        flow,
    ));
    let client = Arc::new(StravaClient::new(
        components.http_client,
        &config.base_url,
        tokens,
    ));
    let server = Arc::new(McpServer::new(client));

    tokio::select! {
        result = server.run_stdio() => {
            if let Err(e) = result {
                error!("Server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        () = shutdown_signal() => {}
    }

    info!("Strava MCP server shutdown complete");
    ExitCode::SUCCESS
}

/// Run the browser flow once and print the refresh token
async fn run_auth(config: &Config, output: Option<&Path>, no_browser: bool) -> ExitCode {
    let components = match build_components(config, config.oauth.open_browser && !no_browser) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to initialize: {e}");
            return ExitCode::FAILURE;
        }
    };

    let refresh_token = tokio::select! {
        result = components.flow.get_refresh_token_via_browser_flow() => match result {
            Ok(token) => token,
            Err(e) => {
                error!("Authorization failed: {e}");
                return ExitCode::FAILURE;
            }
        },
        () = shutdown_signal() => {
            warn!("Authorization cancelled");
            return ExitCode::FAILURE;
        }
    };

    println!("export STRAVA_REFRESH_TOKEN={refresh_token}");

    if let Some(path) = output {
        if let Err(e) = tokio::fs::write(path, format!("STRAVA_REFRESH_TOKEN={refresh_token}\n")).await {
            error!(path = %path.display(), "Failed to write refresh token: {e}");
            return ExitCode::FAILURE;
        }
        info!(path = %path.display(), "Refresh token written");
    }

    ExitCode::SUCCESS
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
