//! Configuration management

use std::{fmt, net::SocketAddr, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::oauth::{AUTHORIZE_URL, DEFAULT_SCOPE, TOKEN_URL};
use crate::{Error, Result};

/// Default Strava REST root
pub const DEFAULT_BASE_URL: &str = "https://www.strava.com/api/v3";

/// Main configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Strava API client ID
    #[serde(deserialize_with = "lossy_string")]
    pub client_id: String,
    /// Strava API client secret
    #[serde(deserialize_with = "lossy_string")]
    pub client_secret: String,
    /// Pre-existing refresh token (optional, obtained via the browser flow otherwise)
    #[serde(deserialize_with = "lossy_opt_string")]
    pub refresh_token: Option<String>,
    /// Strava REST API base URL
    pub base_url: String,
    /// OAuth flow configuration
    pub oauth: OAuthConfig,
    /// Outbound HTTP configuration
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            oauth: OAuthConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("oauth", &self.oauth)
            .field("http", &self.http)
            .finish()
    }
}

impl Config {
    /// Load configuration from an optional YAML file and `STRAVA_` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or the resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // STRAVA_CLIENT_ID, STRAVA_OAUTH__PORT, ...
        figment = figment.merge(Env::prefixed("STRAVA_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and validate a configuration from an assembled figment
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Treat blank optional values as absent
    fn normalize(&mut self) {
        if self
            .refresh_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            self.refresh_token = None;
        }
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
    }

    /// Validate required fields and route layout
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(
                "client_id is required (set STRAVA_CLIENT_ID)".to_string(),
            ));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::Config(
                "client_secret is required (set STRAVA_CLIENT_SECRET)".to_string(),
            ));
        }
        self.oauth.validate()
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Host the callback listener binds to
    pub host: String,
    /// Port the callback listener binds to
    pub port: u16,
    /// Path of the redirect URI that receives the authorization code
    pub callback_path: String,
    /// How long to wait for the user to complete consent
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
    /// Upper bound on the listener's graceful shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Fall back to the browser flow when no refresh token is configured
    pub interactive: bool,
    /// Try to open the consent page automatically
    pub open_browser: bool,
    /// Scopes requested on the consent page
    pub scope: String,
    /// Provider consent page
    pub authorize_url: String,
    /// Provider token endpoint
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3008,
            callback_path: "/exchange_token".to_string(),
            callback_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(5),
            interactive: true,
            open_browser: true,
            scope: DEFAULT_SCOPE.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

impl OAuthConfig {
    /// Socket address the callback listener binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid oauth.host '{}': {e}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if !self.callback_path.starts_with('/') {
            return Err(Error::Config(format!(
                "oauth.callback_path must start with '/': {}",
                self.callback_path
            )));
        }
        if self.callback_path == "/" || self.callback_path == "/auth" {
            return Err(Error::Config(format!(
                "oauth.callback_path '{}' collides with a built-in route",
                self.callback_path
            )));
        }
        // Captures and wildcards are route syntax, not literal paths
        let has_route_syntax = self.callback_path.contains(['{', '}', '*', '?', '#'])
            || self.callback_path.split('/').any(|seg| seg.starts_with(':'));
        if has_route_syntax {
            return Err(Error::Config(format!(
                "oauth.callback_path '{}' must be a literal path",
                self.callback_path
            )));
        }
        Ok(())
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout applied to every upstream request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    /// Build the shared HTTP client
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!("strava-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)
    }
}

/// Env values such as `STRAVA_CLIENT_ID=12345` arrive as numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Text(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
        }
    }
}

fn lossy_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

fn lossy_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration too large: {s}")))
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
