//! Mock Spotify server for testing the Web API client and resolvers
//!
//! Provides a [`MockSpotifyServer`] that answers the token, discovery,
//! track, audio analysis and device registration endpoints. Point a
//! client at it with `SpotifyConfig::with_url(server.url())`.

use std::collections::HashMap;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Message Spotify sends with a 401 once a token has expired
pub const EXPIRED_TOKEN_MESSAGE: &str = "The access token expired";

/// Mock Spotify server
///
/// # Example
///
/// ```rust,ignore
/// use beatsync_test_utils::{fixtures::track_json, MockSpotifyServer};
///
/// #[tokio::test]
/// async fn test_resolve() {
///     let server = MockSpotifyServer::start().await;
///     server.mock_tracks(vec![track_json("a", "Song A")]).await;
///
///     // Configure your client with SpotifyConfig::with_url(server.url())
/// }
/// ```
pub struct MockSpotifyServer {
    server: MockServer,
}

/// Answers `GET /v1/tracks?ids=..` in request order, `null` for unknown ids
struct TracksResponder {
    tracks: HashMap<String, Value>,
}

impl Respond for TracksResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ids = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "ids")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let tracks: Vec<Value> = ids
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| self.tracks.get(id).cloned().unwrap_or(Value::Null))
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "tracks": tracks }))
    }
}

fn expired_body() -> Value {
    json!({ "error": { "status": 401, "message": EXPIRED_TOKEN_MESSAGE } })
}

impl MockSpotifyServer {
    /// Start a new mock Spotify server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the server URL
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Access the underlying wiremock server for custom mocks
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mount a mock minting `token` from the cookie endpoint
    pub async fn mock_access_token(&self, token: &str) {
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clientId": "test-client",
                "accessToken": token,
                "accessTokenExpirationTimestampMs": 1_700_003_600_000_i64,
                "isAnonymous": false
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock minting `first`, then `second` on every later request
    pub async fn mock_access_token_sequence(&self, first: &str, second: &str) {
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clientId": "test-client",
                "accessToken": first,
                "accessTokenExpirationTimestampMs": 1_700_003_600_000_i64,
                "isAnonymous": false
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
        self.mock_access_token(second).await;
    }

    /// Mount a mock for dealer discovery
    pub async fn mock_dealers(&self, dealer: &str) {
        Mock::given(method("GET"))
            .and(path("/apresolve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dealer": [dealer],
                "spclient": ["gew1-spclient.spotify.com:443"]
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock serving the given track objects by id
    pub async fn mock_tracks(&self, tracks: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/v1/tracks"))
            .and(query_param("market", "from_token"))
            .respond_with(Self::tracks_responder(tracks))
            .mount(&self.server)
            .await;
    }

    /// Like [`mock_tracks`](Self::mock_tracks) but only for one bearer token
    pub async fn mock_tracks_for_token(&self, token: &str, tracks: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/v1/tracks"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(Self::tracks_responder(tracks))
            .mount(&self.server)
            .await;
    }

    fn tracks_responder(tracks: Vec<Value>) -> TracksResponder {
        TracksResponder {
            tracks: tracks
                .into_iter()
                .filter_map(|track| {
                    let id = track.get("id")?.as_str()?.to_string();
                    Some((id, track))
                })
                .collect(),
        }
    }

    /// Mount a mock rejecting track lookups made with `token`
    pub async fn mock_tracks_token_expired(&self, token: &str) {
        Mock::given(method("GET"))
            .and(path("/v1/tracks"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(401).set_body_json(expired_body()))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Mount a mock serving an audio analysis for one track id
    pub async fn mock_audio_analysis(&self, track_id: &str, analysis: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/audio-analysis/{}", track_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(analysis))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock rejecting analysis requests made with `token` as expired
    pub async fn mock_audio_analysis_token_expired(&self, token: &str) {
        Mock::given(method("GET"))
            .and(path_regex("^/v1/audio-analysis/.+$"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(401).set_body_json(expired_body()))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Mount a 404 for one track's analysis
    pub async fn mock_audio_analysis_not_found(&self, track_id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/audio-analysis/{}", track_id)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "status": 404, "message": "analysis not found" }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock accepting notification subscriptions
    pub async fn mock_notifications(&self) {
        Mock::given(method("PUT"))
            .and(path("/v1/me/notifications/user"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock registering `device_id` and answering with `cluster`
    pub async fn mock_connect_state(&self, device_id: &str, cluster: Value) {
        Mock::given(method("PUT"))
            .and(path(format!("/connect-state/v1/devices/hobs_{}", device_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock for server errors on every path under `prefix`
    pub async fn mock_server_error(&self, prefix: &str) {
        Mock::given(path_regex(format!("^{}.*$", regex_escape(prefix))))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "status": 500, "message": "Internal Server Error" }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a mock for rate limiting on every path under `prefix`
    pub async fn mock_rate_limit(&self, prefix: &str) {
        Mock::given(path_regex(format!("^{}.*$", regex_escape(prefix))))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "1")
                    .set_body_json(json!({
                        "error": { "status": 429, "message": "API rate limit exceeded" }
                    })),
            )
            .mount(&self.server)
            .await;
    }

    /// Paths of every request received so far, in order
    pub async fn received_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }

    /// Every id requested from the tracks endpoint, in request order
    pub async fn requested_track_ids(&self) -> Vec<Vec<String>> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == "/v1/tracks")
            .filter_map(|request| {
                request
                    .url
                    .query_pairs()
                    .find(|(key, _)| key == "ids")
                    .map(|(_, ids)| ids.split(',').map(str::to_string).collect())
            })
            .collect()
    }
}

fn regex_escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let escape = matches!(c, '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\');
            escape.then_some('\\').into_iter().chain(std::iter::once(c))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::track_json;

    #[tokio::test]
    async fn test_mock_spotify_server_starts() {
        let server = MockSpotifyServer::start().await;
        assert!(server.url().starts_with("http://"));
    }

    #[tokio::test]
    async fn test_tracks_answer_in_request_order_with_nulls() {
        let server = MockSpotifyServer::start().await;
        server
            .mock_tracks(vec![track_json("a", "Song A"), track_json("b", "Song B")])
            .await;

        let client = reqwest::Client::new();
        let body: Value = client
            .get(format!("{}/v1/tracks", server.url()))
            .query(&[("ids", "b,zzz,a"), ("market", "from_token")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["tracks"][0]["id"], "b");
        assert!(body["tracks"][1].is_null());
        assert_eq!(body["tracks"][2]["id"], "a");
        assert_eq!(
            server.requested_track_ids().await,
            vec![vec!["b".to_string(), "zzz".to_string(), "a".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_expired_token_takes_priority() {
        let server = MockSpotifyServer::start().await;
        server.mock_tracks(vec![track_json("a", "Song A")]).await;
        server.mock_tracks_token_expired("stale").await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/v1/tracks", server.url()))
            .query(&[("ids", "a"), ("market", "from_token")])
            .header("authorization", "Bearer stale")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let response = client
            .get(format!("{}/v1/tracks", server.url()))
            .query(&[("ids", "a"), ("market", "from_token")])
            .header("authorization", "Bearer fresh")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[test]
    fn test_regex_escape() {
        assert_eq!(regex_escape("/v1/tracks"), "/v1/tracks");
        assert_eq!(regex_escape("/a.b"), "/a\\.b");
    }
}
