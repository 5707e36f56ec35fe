//! Spotify Web API and dealer configuration types

use crate::{get_env_or_default, optional_env, parse_env, ConfigError, ConfigResult};

/// Default Web API base URL
const DEFAULT_API_URL: &str = "https://api.spotify.com";

/// Default access token endpoint (cookie authenticated)
const DEFAULT_TOKEN_URL: &str =
    "https://open.spotify.com/get_access_token?reason=transport&productType=web_player";

/// Default dealer discovery endpoint
const DEFAULT_DISCOVERY_URL: &str = "https://apresolve.spotify.com/?type=dealer&type=spclient";

/// Default spclient base (connect-state, notifications)
const DEFAULT_SPCLIENT_URL: &str = "https://guc-spclient.spotify.com";

/// Spotify service configuration
#[derive(Clone)]
pub struct SpotifyConfig {
    /// Web API base URL (tracks, audio analysis)
    pub api_url: String,

    /// Access token endpoint
    pub token_url: String,

    /// Dealer discovery endpoint
    pub discovery_url: String,

    /// spclient base URL used to register the listening device
    pub spclient_url: String,

    /// Explicit dealer WebSocket URL, skipping discovery when set
    pub dealer_url: Option<String>,

    /// open.spotify.com cookie used to mint access tokens
    pub cookie: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Retry attempts for transient failures
    pub max_retries: u32,
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("api_url", &self.api_url)
            .field("token_url", &self.token_url)
            .field("discovery_url", &self.discovery_url)
            .field("spclient_url", &self.spclient_url)
            .field("dealer_url", &self.dealer_url)
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SpotifyConfig {
    /// Load Spotify configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            api_url: get_env_or_default("SPOTIFY_API_URL", DEFAULT_API_URL),
            token_url: get_env_or_default("SPOTIFY_TOKEN_URL", DEFAULT_TOKEN_URL),
            discovery_url: get_env_or_default("SPOTIFY_DISCOVERY_URL", DEFAULT_DISCOVERY_URL),
            spclient_url: get_env_or_default("SPOTIFY_SPCLIENT_URL", DEFAULT_SPCLIENT_URL),
            dealer_url: optional_env("SPOTIFY_DEALER_URL"),
            cookie: optional_env("SPOTIFY_COOKIE"),
            timeout_secs: parse_env("SPOTIFY_TIMEOUT", 10)?,
            connect_timeout_secs: parse_env("SPOTIFY_CONNECT_TIMEOUT", 5)?,
            max_retries: parse_env("SPOTIFY_MAX_RETRIES", 3)?,
        })
    }

    /// Create a configuration pointing every endpoint at one base URL (useful for testing)
    pub fn with_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let base = url.trim_end_matches('/').to_string();
        Self {
            token_url: format!("{}/get_access_token", base),
            discovery_url: format!("{}/apresolve", base),
            spclient_url: base.clone(),
            api_url: base,
            ..Self::default()
        }
    }

    /// The cookie, required by anything that mints access tokens
    pub fn require_cookie(&self) -> ConfigResult<&str> {
        self.cookie
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("SPOTIFY_COOKIE".to_string()))
    }

    /// Full URL of the several-tracks endpoint
    pub fn tracks_url(&self) -> String {
        format!("{}/v1/tracks", self.api_url.trim_end_matches('/'))
    }

    /// Full URL of the notification subscription for a dealer connection
    pub fn notifications_url(&self) -> String {
        format!("{}/v1/me/notifications/user", self.api_url.trim_end_matches('/'))
    }

    /// Full URL registering a hidden connect-state device
    pub fn connect_state_url(&self, device_id: &str) -> String {
        format!(
            "{}/connect-state/v1/devices/hobs_{}",
            self.spclient_url.trim_end_matches('/'),
            device_id
        )
    }

    /// Full URL of the audio analysis endpoint for one track
    pub fn audio_analysis_url(&self, track_id: &str) -> String {
        format!(
            "{}/v1/audio-analysis/{}",
            self.api_url.trim_end_matches('/'),
            track_id
        )
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            spclient_url: DEFAULT_SPCLIENT_URL.to_string(),
            dealer_url: None,
            cookie: None,
            timeout_secs: 10,
            connect_timeout_secs: 5,
            max_retries: 3,
        }
    }
}
