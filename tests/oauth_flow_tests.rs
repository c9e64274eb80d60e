//! Browser authorization flow tests
//!
//! Drives the full flow against an in-process token endpoint, with a stub
//! user agent standing in for the browser and the provider redirect.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::json;

use common::{
    BrokenAgent, CLIENT_ID, CLIENT_SECRET, CapturingAgent, MockTokenEndpoint, RedirectingAgent,
    StubGrant, can_rebind, flow_config, free_addr,
};
use strava_mcp::Error;
use strava_mcp::oauth::{
    AccessTokenCache, CallbackListener, CallbackRoutes, ClientCredentials, FlowConfig,
    FlowOrchestrator, FlowState, PendingExchange, Settlement, TokenExchanger, TokenGrant,
    UserAgent,
};

const LONG: Duration = Duration::from_secs(30);

fn exchanger(token_url: &str) -> Arc<dyn TokenGrant> {
    Arc::new(TokenExchanger::new(
        reqwest::Client::new(),
        ClientCredentials::new(CLIENT_ID, CLIENT_SECRET),
        token_url,
    ))
}

fn orchestrator(
    grant: Arc<dyn TokenGrant>,
    agent: Arc<dyn UserAgent>,
    callback_timeout: Duration,
) -> FlowOrchestrator {
    FlowOrchestrator::new(
        flow_config("127.0.0.1:0".parse().unwrap(), callback_timeout),
        CLIENT_ID,
        grant,
        agent,
    )
}

async fn wait_for_state(flow: &FlowOrchestrator, expected: FlowState) {
    for _ in 0..200 {
        if flow.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("flow never reached {expected:?}, stuck in {:?}", flow.state());
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn browser_flow_returns_refresh_token() {
    let endpoint = MockTokenEndpoint::new();
    let token_url = endpoint.start().await;
    let agent = Arc::new(RedirectingAgent::new("code=abc123&scope=read,activity:read_all"));
    let flow = orchestrator(exchanger(&token_url), agent.clone(), LONG);

    let refresh_token = flow.get_refresh_token_via_browser_flow().await.unwrap();

    assert_eq!(refresh_token, "R");
    assert_eq!(flow.state(), FlowState::Idle);
    assert_eq!(agent.opened.load(Ordering::SeqCst), 1);

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["grant_type"], "authorization_code");
    assert_eq!(requests[0]["code"], "abc123");
    assert_eq!(requests[0]["client_id"], CLIENT_ID);
    assert_eq!(requests[0]["client_secret"], CLIENT_SECRET);
}

#[tokio::test]
async fn cache_keeps_access_token_from_browser_flow() {
    let endpoint = MockTokenEndpoint::new();
    let token_url = endpoint.start().await;
    let grant = exchanger(&token_url);
    let flow = orchestrator(
        Arc::clone(&grant),
        Arc::new(RedirectingAgent::new("code=abc123")),
        LONG,
    );
    let cache = AccessTokenCache::new(grant, None, Some(Arc::new(flow)));

    let access_token = cache.ensure_access_token().await.unwrap();

    assert_eq!(access_token, "A");
    assert_eq!(
        cache.expires_at(),
        DateTime::from_timestamp(endpoint.expires_at, 0)
    );
    assert_eq!(cache.refresh_token().as_deref(), Some("R"));
    // The exchange already minted an access token; no extra refresh
    assert_eq!(endpoint.requests().len(), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_browser_flow() {
    let endpoint = MockTokenEndpoint::new();
    let token_url = endpoint.start().await;
    let grant = exchanger(&token_url);
    let agent = Arc::new(RedirectingAgent::new("code=abc123"));
    let flow = orchestrator(Arc::clone(&grant), agent.clone(), LONG);
    let cache = Arc::new(AccessTokenCache::new(grant, None, Some(Arc::new(flow))));

    let mut callers = Vec::new();
    for _ in 0..5 {
        let cache = Arc::clone(&cache);
        callers.push(tokio::spawn(async move { cache.ensure_access_token().await }));
    }
    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), "A");
    }

    assert_eq!(agent.opened.load(Ordering::SeqCst), 1);
    assert_eq!(endpoint.requests().len(), 1);
    assert_eq!(cache.refresh_token().as_deref(), Some("R"));
}

#[tokio::test]
async fn browser_launch_failure_is_not_fatal() {
    let flow = orchestrator(
        Arc::new(StubGrant::new()),
        Arc::new(BrokenAgent),
        Duration::from_millis(200),
    );

    // The flow keeps waiting for a manual visit until the window closes
    let err = flow.authorize().await.unwrap_err();

    assert!(matches!(err, Error::TimedOut(_)), "got {err:?}");
    assert_eq!(flow.state(), FlowState::Idle);
}

// ============================================================================
// Single-flight and cancellation
// ============================================================================

#[tokio::test]
async fn second_flow_fails_fast_while_awaiting_callback() {
    let agent = Arc::new(CapturingAgent::default());
    let flow = Arc::new(orchestrator(Arc::new(StubGrant::new()), agent.clone(), LONG));

    let first = tokio::spawn({
        let flow = Arc::clone(&flow);
        async move { flow.authorize().await }
    });
    wait_for_state(&flow, FlowState::AwaitingCallback).await;

    let err = flow.get_refresh_token_via_browser_flow().await.unwrap_err();
    assert!(matches!(err, Error::FlowAlreadyInProgress));
    assert_eq!(flow.state(), FlowState::AwaitingCallback);
    assert_eq!(agent.urls.lock().len(), 1, "no second browser tab");

    // Cancelling the first flow releases the listener and resets state
    let addr = agent.redirect_addr().unwrap();
    first.abort();
    let _ = first.await;

    assert_eq!(flow.state(), FlowState::Idle);
    assert!(can_rebind(addr).await, "listener port still bound after cancel");
}

#[tokio::test]
async fn timeout_stops_listener_and_releases_port() {
    let addr = free_addr().await;
    let flow = FlowOrchestrator::new(
        flow_config(addr, Duration::from_millis(200)),
        CLIENT_ID,
        Arc::new(StubGrant::new()),
        Arc::new(CapturingAgent::default()),
    );

    let err = flow.authorize().await.unwrap_err();

    assert!(matches!(err, Error::TimedOut(d) if d == Duration::from_millis(200)));
    assert_eq!(flow.state(), FlowState::Idle);
    assert!(can_rebind(addr).await, "listener port still bound after timeout");
}

#[tokio::test]
async fn exchange_finishing_after_timeout_renders_failure() {
    let grant = Arc::new(StubGrant {
        delay: Duration::from_millis(600),
        ..StubGrant::new()
    });
    let agent = Arc::new(CapturingAgent::default());
    let config = FlowConfig {
        shutdown_timeout: Duration::from_secs(3),
        ..flow_config("127.0.0.1:0".parse().unwrap(), Duration::from_millis(300))
    };
    let flow = Arc::new(FlowOrchestrator::new(
        config,
        CLIENT_ID,
        grant.clone(),
        agent.clone(),
    ));

    let outcome = tokio::spawn({
        let flow = Arc::clone(&flow);
        async move { flow.authorize().await }
    });
    wait_for_state(&flow, FlowState::AwaitingCallback).await;
    let addr = agent.redirect_addr().unwrap();

    let page = reqwest::get(format!("http://{addr}/exchange_token?code=abc123"))
        .await
        .unwrap();
    let status = page.status();
    let body = page.text().await.unwrap();

    let err = outcome.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::TimedOut(_)), "got {err:?}");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Authorization failed"));
    assert!(!body.contains("Authorization successful"));
    assert_eq!(grant.exchanges.load(Ordering::SeqCst), 1);
    assert_eq!(flow.state(), FlowState::Idle);
}

#[tokio::test]
async fn busy_port_is_startup_error() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let flow = FlowOrchestrator::new(
        flow_config(blocker.local_addr().unwrap(), LONG),
        CLIENT_ID,
        Arc::new(StubGrant::new()),
        Arc::new(CapturingAgent::default()),
    );

    let err = flow.authorize().await.unwrap_err();
    assert!(matches!(err, Error::ListenerStartup { .. }));
    assert_eq!(flow.state(), FlowState::Idle);
}

// ============================================================================
// Failure outcomes
// ============================================================================

#[tokio::test]
async fn provider_denial_is_reported() {
    let endpoint = MockTokenEndpoint::new();
    let token_url = endpoint.start().await;
    let flow = orchestrator(
        exchanger(&token_url),
        Arc::new(RedirectingAgent::new("error=access_denied")),
        LONG,
    );

    let err = flow.authorize().await.unwrap_err();

    assert!(matches!(err, Error::AuthorizationDenied(ref e) if e == "access_denied"));
    assert!(endpoint.requests().is_empty(), "no exchange after denial");
    assert_eq!(flow.state(), FlowState::Idle);
}

#[tokio::test]
async fn upstream_rejection_is_redacted() {
    let endpoint = MockTokenEndpoint::failing(
        400,
        json!({"message": "Bad Request", "errors": [{"field": "client_secret", "code": "invalid", "value": CLIENT_SECRET}]}),
    );
    let token_url = endpoint.start().await;
    let flow = orchestrator(
        exchanger(&token_url),
        Arc::new(RedirectingAgent::new("code=abc123")),
        LONG,
    );

    let err = flow.authorize().await.unwrap_err();

    let Error::UpstreamAuth { status, body } = err else {
        panic!("expected UpstreamAuth, got {err:?}");
    };
    assert_eq!(status, 400);
    assert!(body.contains("Bad Request"));
    assert!(!body.contains(CLIENT_SECRET));
    assert_eq!(flow.state(), FlowState::Idle);
}

#[tokio::test]
async fn cache_wraps_flow_failure() {
    let flow = orchestrator(
        Arc::new(StubGrant::new()),
        Arc::new(RedirectingAgent::new("error=access_denied")),
        LONG,
    );
    let cache = AccessTokenCache::new(Arc::new(StubGrant::new()), None, Some(Arc::new(flow)));

    let err = cache.ensure_access_token().await.unwrap_err();

    assert!(matches!(err, Error::TokenUnavailable(_)));
    assert!(matches!(err.root_cause(), Error::AuthorizationDenied(_)));
    assert!(cache.refresh_token().is_none());
}

// ============================================================================
// Listener routes
// ============================================================================

struct RunningListener {
    base: String,
    grant: Arc<StubGrant>,
    resolver: strava_mcp::oauth::ExchangeResolver,
    handle: strava_mcp::oauth::ListenerHandle,
}

async fn start_listener() -> RunningListener {
    let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let base = format!("http://{}", listener.local_addr());
    let grant = Arc::new(StubGrant::new());
    let (resolver, _waiter) = PendingExchange::create();
    let handle = listener.serve(CallbackRoutes {
        consent_url: "https://www.strava.com/oauth/authorize?client_id=12345".to_string(),
        callback_path: "/exchange_token".to_string(),
        grant: grant.clone(),
        resolver: resolver.clone(),
        flow_state: Arc::new(parking_lot::Mutex::new(FlowState::AwaitingCallback)),
    });
    RunningListener {
        base,
        grant,
        resolver,
        handle,
    }
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn auth_route_redirects_to_consent_page() {
    let running = start_listener().await;
    let client = no_redirect_client();

    let resp = client.get(format!("{}/auth", running.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        resp.headers()["location"],
        "https://www.strava.com/oauth/authorize?client_id=12345"
    );

    let resp = client.get(format!("{}/", running.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()["location"], "/auth");

    running.handle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn repeated_callback_renders_same_page_without_second_exchange() {
    let running = start_listener().await;
    let client = no_redirect_client();
    let url = format!("{}/exchange_token?code=abc123", running.base);

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = first.text().await.unwrap();

    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.text().await.unwrap(), first_body);

    assert!(first_body.contains("Authorization successful"));
    assert_eq!(running.grant.exchanges.load(Ordering::SeqCst), 1);
    assert_eq!(running.resolver.settlement(), Some(Settlement::Succeeded));

    running.handle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn callback_without_code_leaves_exchange_pending() {
    let running = start_listener().await;
    let client = no_redirect_client();

    let resp = client
        .get(format!("{}/exchange_token", running.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.text().await.unwrap().contains("Authorization failed"));
    assert!(!running.resolver.is_settled());
    assert_eq!(running.grant.exchanges.load(Ordering::SeqCst), 0);

    running.handle.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn failed_exchange_renders_failure_page() {
    let running = start_listener().await;
    let client = no_redirect_client();

    let resp = client
        .get(format!("{}/exchange_token?code=wrong", running.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = resp.text().await.unwrap();
    assert!(body.contains("Authorization failed"));
    assert!(!body.contains("bad code"), "upstream details stay in the logs");
    assert!(matches!(running.resolver.settlement(), Some(Settlement::Failed(_))));

    running.handle.stop(Duration::from_secs(1)).await;
}
