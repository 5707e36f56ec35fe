//! Spotify Web API client implementation

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use beatsync_shared_config::SpotifyConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, ORIGIN, REFERER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{SpotifyError, SpotifyResult, TOKEN_EXPIRED_MESSAGE};
use crate::models::{
    AccessToken, AnalysisResult, DealerDiscovery, ErrorResponse, Track, TracksResponse,
};

/// Browser user agent the open.spotify.com endpoints expect
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36";

const SPOTIFY_ORIGIN: &str = "https://open.spotify.com";

/// The several-tracks endpoint accepts at most this many ids
const MAX_TRACK_IDS: usize = 50;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Which endpoint produced an error response
///
/// Token expiry is signalled differently per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Tracks,
    AudioAnalysis,
    Other,
}

/// Spotify Web API client
#[derive(Clone)]
pub struct SpotifyClient {
    http_client: Client,
    config: SpotifyConfig,
    max_retries: u32,
}

impl fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyClient")
            .field("api_url", &self.config.api_url)
            .field("cookie", &self.config.cookie.as_ref().map(|_| "[REDACTED]"))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl SpotifyClient {
    /// Create a new client from configuration
    ///
    /// # Errors
    /// Returns `SpotifyError::Http` if the HTTP client cannot be built
    pub fn new(config: &SpotifyConfig) -> SpotifyResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://open.spotify.com/"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            config: config.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Configuration this client was built from
    pub fn config(&self) -> &SpotifyConfig {
        &self.config
    }

    /// Execute an operation with retry logic for transient failures
    async fn with_retry<T, F, Fut>(&self, operation: F) -> SpotifyResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SpotifyResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay_ms = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!(
                        attempt = attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay_ms,
                        error = %e,
                        "Spotify request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a request and turn non-success statuses into errors
    async fn make_request(&self, request: RequestBuilder, endpoint: Endpoint) -> SpotifyResult<String> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SpotifyError::Timeout
            } else {
                SpotifyError::Http(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(SpotifyError::Http)?;

        if status.is_success() {
            return Ok(text);
        }

        Err(classify_error(status, &text, endpoint))
    }

    /// Mint an access token from the configured open.spotify.com cookie
    ///
    /// # Errors
    /// - `SpotifyError::MissingCookie` if no cookie is configured
    /// - `SpotifyError::Api` / `SpotifyError::Http` on request failure
    #[instrument(skip(self))]
    pub async fn get_access_token(&self) -> SpotifyResult<AccessToken> {
        let cookie = self
            .config
            .cookie
            .as_deref()
            .ok_or(SpotifyError::MissingCookie)?;

        debug!("Requesting Spotify access token");

        let text = self
            .with_retry(|| async {
                let request = self
                    .http_client
                    .get(&self.config.token_url)
                    .header("cookie", cookie);
                self.make_request(request, Endpoint::Other).await
            })
            .await?;

        let token: AccessToken = serde_json::from_str(&text)?;
        debug!(
            expires_at_ms = token.access_token_expiration_timestamp_ms,
            anonymous = token.is_anonymous,
            "Received access token"
        );
        Ok(token)
    }

    /// Resolve the dealers currently offered by Spotify
    #[instrument(skip(self))]
    pub async fn discover_dealers(&self) -> SpotifyResult<DealerDiscovery> {
        let text = self
            .with_retry(|| async {
                let request = self
                    .http_client
                    .get(&self.config.discovery_url)
                    .header(ORIGIN, SPOTIFY_ORIGIN);
                self.make_request(request, Endpoint::Other).await
            })
            .await?;

        let discovery: DealerDiscovery = serde_json::from_str(&text)?;
        debug!(dealers = discovery.dealer.len(), "Discovered dealers");
        Ok(discovery)
    }

    /// Resolve full metadata for a set of track ids
    ///
    /// Ids unknown to Spotify are absent from the result. Requests are
    /// chunked to the endpoint's id limit.
    ///
    /// # Errors
    /// - `SpotifyError::TokenExpired` on HTTP 401/403
    /// - `SpotifyError::Api` / `SpotifyError::Http` on other failures
    #[instrument(skip(self, ids, access_token), fields(count = ids.len()))]
    pub async fn get_tracks(
        &self,
        ids: &[String],
        access_token: &str,
    ) -> SpotifyResult<HashMap<String, Track>> {
        let mut tracks = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(tracks);
        }

        let url = self.config.tracks_url();
        let bearer = bearer(access_token)?;

        for chunk in ids.chunks(MAX_TRACK_IDS) {
            let joined = chunk.join(",");
            let text = self
                .with_retry(|| async {
                    let request = self
                        .http_client
                        .get(&url)
                        .query(&[("ids", joined.as_str()), ("market", "from_token")])
                        .header(ORIGIN, SPOTIFY_ORIGIN)
                        .header(AUTHORIZATION, bearer.clone());
                    self.make_request(request, Endpoint::Tracks).await
                })
                .await?;

            let response: TracksResponse = serde_json::from_str(&text)?;
            tracks.extend(
                response
                    .tracks
                    .into_iter()
                    .flatten()
                    .map(|track| (track.id.clone(), track)),
            );
        }

        debug!(resolved = tracks.len(), "Resolved tracks");
        Ok(tracks)
    }

    /// Fetch the audio analysis of one track
    ///
    /// # Errors
    /// - `SpotifyError::InvalidInput` if the id is empty
    /// - `SpotifyError::TokenExpired` on HTTP 401 with the expired-token message
    /// - `SpotifyError::NotFound` if the track has no analysis
    #[instrument(skip(self, access_token))]
    pub async fn get_audio_analysis(
        &self,
        track_id: &str,
        access_token: &str,
    ) -> SpotifyResult<AnalysisResult> {
        let track_id = track_id.trim();
        if track_id.is_empty() {
            return Err(SpotifyError::InvalidInput(
                "track id cannot be empty".to_string(),
            ));
        }

        let url = self.config.audio_analysis_url(track_id);
        let bearer = bearer(access_token)?;

        let text = self
            .with_retry(|| async {
                let request = self
                    .http_client
                    .get(&url)
                    .header(AUTHORIZATION, bearer.clone());
                self.make_request(request, Endpoint::AudioAnalysis).await
            })
            .await
            .map_err(|e| match e {
                SpotifyError::Api { status: 404, .. } => SpotifyError::NotFound(track_id.to_string()),
                other => other,
            })?;

        let analysis: AnalysisResult = serde_json::from_str(&text)?;
        debug!(
            track_id = %track_id,
            bars = analysis.bars.len(),
            beats = analysis.beats.len(),
            segments = analysis.segments.len(),
            "Fetched audio analysis"
        );
        Ok(analysis)
    }

    /// Subscribe a dealer connection to the user's notifications
    #[instrument(skip(self, access_token))]
    pub async fn subscribe_to_notifications(
        &self,
        connection_id: &str,
        access_token: &str,
    ) -> SpotifyResult<()> {
        let url = self.config.notifications_url();
        let bearer = bearer(access_token)?;

        self.with_retry(|| async {
            let request = self
                .http_client
                .put(&url)
                .query(&[("connection_id", connection_id)])
                .header(AUTHORIZATION, bearer.clone());
            self.make_request(request, Endpoint::Other).await
        })
        .await?;

        Ok(())
    }

    /// Register a hidden device on the connection and return the current cluster
    ///
    /// The cluster is returned as whatever type the caller models it with.
    #[instrument(skip(self, access_token))]
    pub async fn connect_state<T: DeserializeOwned>(
        &self,
        connection_id: &str,
        access_token: &str,
        device_id: &str,
    ) -> SpotifyResult<T> {
        let url = self.config.connect_state_url(device_id);
        let bearer = bearer(access_token)?;
        let connection = HeaderValue::from_str(connection_id)
            .map_err(|e| SpotifyError::InvalidInput(format!("connection id: {}", e)))?;
        let body = serde_json::json!({
            "device": {
                "device_info": {
                    "capabilities": {
                        "can_be_player": false,
                        "hidden": true,
                        "needs_full_player_state": true
                    }
                }
            },
            "member_type": "CONNECT_STATE"
        });

        let text = self
            .with_retry(|| async {
                let request = self
                    .http_client
                    .put(&url)
                    .json(&body)
                    .header(AUTHORIZATION, bearer.clone())
                    .header("x-spotify-connection-id", connection.clone());
                self.make_request(request, Endpoint::Other).await
            })
            .await?;

        Ok(serde_json::from_str(&text)?)
    }
}

fn bearer(access_token: &str) -> SpotifyResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|_| SpotifyError::InvalidInput("access token is not a valid header".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Map an error response onto a `SpotifyError`
fn classify_error(status: StatusCode, body: &str, endpoint: Endpoint) -> SpotifyError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    let code = status.as_u16();

    let expired = match endpoint {
        Endpoint::Tracks => matches!(code, 401 | 403),
        Endpoint::AudioAnalysis => code == 401 && message == TOKEN_EXPIRED_MESSAGE,
        Endpoint::Other => false,
    };
    if expired {
        return SpotifyError::TokenExpired {
            status: code,
            message,
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Spotify API rate limited");
        return SpotifyError::RateLimited;
    }

    SpotifyError::Api {
        status: code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRED_BODY: &str = r#"{"error":{"status":401,"message":"The access token expired"}}"#;

    #[test]
    fn test_client_debug_redacts_cookie() {
        let config = SpotifyConfig {
            cookie: Some("sp_dc=secret".to_string()),
            ..SpotifyConfig::default()
        };
        let client = SpotifyClient::new(&config).unwrap();
        let debug_str = format!("{:?}", client);
        assert!(!debug_str.contains("secret"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_tracks_expire_on_401_and_403() {
        for code in [401, 403] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_error(status, "{}", Endpoint::Tracks);
            assert!(err.is_token_expired(), "status {} should expire", code);
        }
    }

    #[test]
    fn test_analysis_expires_only_with_message() {
        let err = classify_error(StatusCode::UNAUTHORIZED, EXPIRED_BODY, Endpoint::AudioAnalysis);
        assert!(err.is_token_expired());

        let other = r#"{"error":{"status":401,"message":"Invalid access token"}}"#;
        let err = classify_error(StatusCode::UNAUTHORIZED, other, Endpoint::AudioAnalysis);
        assert!(!err.is_token_expired());

        let err = classify_error(StatusCode::FORBIDDEN, EXPIRED_BODY, Endpoint::AudioAnalysis);
        assert!(!err.is_token_expired());
    }

    #[test]
    fn test_rate_limit_and_plain_errors() {
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, "", Endpoint::Tracks);
        assert!(matches!(err, SpotifyError::RateLimited));

        let err = classify_error(StatusCode::BAD_GATEWAY, "upstream", Endpoint::Other);
        assert!(matches!(err, SpotifyError::Api { status: 502, ref message } if message == "upstream"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_access_token_requires_cookie() {
        let client = SpotifyClient::new(&SpotifyConfig::default()).unwrap();
        let result = client.get_access_token().await;
        assert!(matches!(result, Err(SpotifyError::MissingCookie)));
    }

    #[tokio::test]
    async fn test_empty_track_ids_skip_request() {
        let client = SpotifyClient::new(&SpotifyConfig::with_url("http://127.0.0.1:1")).unwrap();
        let tracks = client.get_tracks(&[], "token").await.unwrap();
        assert!(tracks.is_empty());
    }
}
