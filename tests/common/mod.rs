//! Shared upstream doubles for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

use strava_mcp::oauth::{FlowConfig, TokenGrant, TokenSet, UserAgent};
use strava_mcp::{Error, Result};

pub const CLIENT_ID: &str = "12345";
pub const CLIENT_SECRET: &str = "top-secret-value";

/// Serve `app` on an ephemeral local port
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Bind `addr`, retrying while an aborted server finishes closing its socket
pub async fn can_rebind(addr: SocketAddr) -> bool {
    for _ in 0..50 {
        if TcpListener::bind(addr).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// A port that was free a moment ago
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn flow_config(bind_addr: SocketAddr, callback_timeout: Duration) -> FlowConfig {
    FlowConfig {
        bind_addr,
        callback_path: "/exchange_token".to_string(),
        scope: "read_all,activity:read,activity:read_all,profile:read_all".to_string(),
        authorize_url: "https://www.strava.com/oauth/authorize".to_string(),
        callback_timeout,
        shutdown_timeout: Duration::from_secs(1),
    }
}

// ============================================================================
// Token endpoint double
// ============================================================================

/// Scripted `/oauth/token` endpoint
#[derive(Clone)]
pub struct MockTokenEndpoint {
    pub requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    pub expires_at: i64,
    pub failure: Option<(u16, Value)>,
}

impl MockTokenEndpoint {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            expires_at: Utc::now().timestamp() + 3600,
            failure: None,
        }
    }

    pub fn failing(status: u16, body: Value) -> Self {
        Self {
            failure: Some((status, body)),
            ..Self::new()
        }
    }

    /// Start serving; returns the token URL
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/oauth/token", post(token_handler))
            .with_state(self.clone());
        let addr = spawn_app(app).await;
        format!("http://{addr}/oauth/token")
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().clone()
    }
}

async fn token_handler(
    State(endpoint): State<MockTokenEndpoint>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    endpoint.requests.lock().push(form.clone());

    if let Some((status, body)) = &endpoint.failure {
        return (StatusCode::from_u16(*status).unwrap(), Json(body.clone()));
    }

    let grant = form.get("grant_type").map(String::as_str);
    let code = form.get("code").map(String::as_str);
    match (grant, code) {
        (Some("authorization_code"), Some("abc123")) => (
            StatusCode::OK,
            Json(json!({
                "access_token": "A",
                "refresh_token": "R",
                "expires_at": endpoint.expires_at,
                "expires_in": 3600,
                "token_type": "Bearer"
            })),
        ),
        (Some("refresh_token"), _) => (
            StatusCode::OK,
            Json(json!({
                "access_token": "refreshed",
                "refresh_token": "R2",
                "expires_at": endpoint.expires_at,
                "expires_in": 3600,
                "token_type": "Bearer"
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Bad Request", "code": 400})),
        ),
    }
}

// ============================================================================
// Token grant stub
// ============================================================================

/// In-process grant that counts calls and rotates refresh tokens on request
pub struct StubGrant {
    pub refreshes: AtomicUsize,
    pub exchanges: AtomicUsize,
    pub seen_refresh_tokens: Mutex<Vec<String>>,
    pub rotate_to: Option<String>,
    pub delay: Duration,
    pub fail_refresh: Mutex<Option<Error>>,
}

impl StubGrant {
    pub fn new() -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            seen_refresh_tokens: Mutex::new(Vec::new()),
            rotate_to: None,
            delay: Duration::ZERO,
            fail_refresh: Mutex::new(None),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

pub fn token_set(access: &str, refresh: Option<&str>) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.map(ToString::to_string),
        expires_at: Utc::now() + TimeDelta::seconds(3600),
        expires_in: Duration::from_secs(3600),
        token_type: "Bearer".to_string(),
    }
}

#[async_trait]
impl TokenGrant for StubGrant {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if code == "abc123" {
            Ok(token_set("A", Some("R")))
        } else {
            Err(Error::UpstreamAuth {
                status: 400,
                body: "bad code".to_string(),
            })
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_refresh_tokens.lock().push(refresh_token.to_string());
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.fail_refresh.lock().take() {
            return Err(err);
        }
        Ok(token_set(&format!("access-{n}"), self.rotate_to.as_deref()))
    }
}

// ============================================================================
// User agents
// ============================================================================

/// Records consent URLs without visiting them
#[derive(Default)]
pub struct CapturingAgent {
    pub urls: Mutex<Vec<String>>,
}

impl CapturingAgent {
    pub fn redirect_addr(&self) -> Option<SocketAddr> {
        let urls = self.urls.lock();
        let consent = Url::parse(urls.first()?).ok()?;
        let redirect = consent
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned())?;
        let redirect = Url::parse(&redirect).ok()?;
        redirect.socket_addrs(|| None).ok()?.into_iter().next()
    }
}

impl UserAgent for CapturingAgent {
    fn open(&self, url: &str) -> io::Result<()> {
        self.urls.lock().push(url.to_string());
        Ok(())
    }
}

/// Plays the provider: immediately hits the redirect URI with `query`
pub struct RedirectingAgent {
    pub query: String,
    pub opened: AtomicUsize,
}

impl RedirectingAgent {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            opened: AtomicUsize::new(0),
        }
    }
}

impl UserAgent for RedirectingAgent {
    fn open(&self, url: &str) -> io::Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let consent = Url::parse(url).map_err(io::Error::other)?;
        let redirect = consent
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| io::Error::other("no redirect_uri"))?;
        let callback = format!("{redirect}?state=&{}", self.query);
        tokio::spawn(async move {
            let _ = reqwest::get(&callback).await;
        });
        Ok(())
    }
}

/// Always fails to launch
pub struct BrokenAgent;

impl UserAgent for BrokenAgent {
    fn open(&self, _url: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no browser"))
    }
}

// ============================================================================
// Strava REST double
// ============================================================================

/// One recorded REST request
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub query: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct MockStravaApi {
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockStravaApi {
    /// Start serving; returns the API base URL
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/api/v3/athlete/activities", get(list_activities))
            .route("/api/v3/activities/{id}", get(get_activity))
            .route("/api/v3/segments/{id}/leaderboard", get(get_leaderboard))
            .with_state(self.clone());
        let addr = spawn_app(app).await;
        format!("http://{addr}/api/v3")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, path: String, headers: &HeaderMap, query: HashMap<String, String>) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        self.requests.lock().push(RecordedRequest {
            path,
            authorization,
            query,
        });
    }
}

async fn list_activities(
    State(api): State<MockStravaApi>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    api.record("/athlete/activities".to_string(), &headers, query);
    (
        StatusCode::OK,
        Json(json!([
            {
                "id": 1001,
                "name": "Morning Ride",
                "distance": 28099.0,
                "moving_time": 4207,
                "elapsed_time": 4410,
                "total_elevation_gain": 516.0,
                "type": "Ride",
                "sport_type": "MountainBikeRide",
                "start_date": "2024-05-02T12:15:09Z",
                "start_date_local": "2024-05-02T05:15:09Z",
                "timezone": "(GMT-08:00) America/Los_Angeles",
                "kudos_count": 19,
                "trainer": false,
                "commute": false,
                "average_speed": 6.679,
                "max_speed": 18.5,
                "has_heartrate": true,
                "average_heartrate": 140.3
            },
            {
                "id": 1002,
                "name": "Evening Run",
                "distance": 5000.0,
                "type": "Run",
                "start_date": "2024-05-03T18:00:00Z"
            }
        ])),
    )
}

async fn get_activity(
    State(api): State<MockStravaApi>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    api.record(format!("/activities/{id}"), &headers, query);
    if id == 402 {
        // Slow rejection, leaves room for a concurrent token renewal
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    match id {
        42 => (
            StatusCode::OK,
            Json(json!({
                "id": 42,
                "name": "Hill Repeats",
                "type": "Ride",
                "distance": 12000.0,
                "start_date": "2024-05-04T07:00:00Z",
                "description": "Legs on fire",
                "calories": 870.0,
                "device_name": "Garmin Edge 540",
                "segment_efforts": [
                    {
                        "id": 9001,
                        "name": "Old La Honda",
                        "elapsed_time": 1200,
                        "moving_time": 1190,
                        "start_date": "2024-05-04T07:10:00Z",
                        "start_date_local": "2024-05-04T00:10:00Z",
                        "distance": 4800.0,
                        "pr_rank": 2,
                        "athlete": {"id": 7},
                        "segment": {
                            "id": 8109834,
                            "name": "Old La Honda",
                            "activity_type": "Ride",
                            "distance": 4800.0,
                            "average_grade": 7.9,
                            "maximum_grade": 12.1,
                            "elevation_high": 493.4,
                            "elevation_low": 109.6,
                            "start_latlng": [37.39, -122.23],
                            "end_latlng": [37.37, -122.25],
                            "climb_category": 3,
                            "private": false,
                            "starred": true
                        }
                    }
                ]
            })),
        ),
        7 => (
            StatusCode::OK,
            Json(json!({"id": 7, "name": "Treadmill", "type": "Run"})),
        ),
        401 | 402 => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Authorization Error", "errors": []})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Record Not Found", "code": 404})),
        ),
    }
}

async fn get_leaderboard(
    State(api): State<MockStravaApi>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    api.record(format!("/segments/{id}/leaderboard"), &headers, query);
    (
        StatusCode::OK,
        Json(json!({
            "entry_count": 2,
            "effort_count": 2,
            "kom_type": "kom",
            "entries": [
                {"athlete_name": "Jane D.", "elapsed_time": 600, "moving_time": 600, "start_date": "2024-04-01T10:00:00Z", "rank": 1},
                {"athlete_name": "John S.", "elapsed_time": 640, "moving_time": 635, "rank": 2}
            ]
        })),
    )
}
