//! Spotify client integration tests
//!
//! Runs the client against a wiremock server covering:
//! - Access token minting and dealer discovery
//! - Track lookup, including unknown ids
//! - Audio analysis retrieval and its error mapping
//! - Device registration and notification subscription
//! - Retry behaviour on transient failures

use beatsync_shared_config::SpotifyConfig;
use beatsync_spotify_client::{SpotifyClient, SpotifyError};
use beatsync_test_utils::fixtures::{track_json, AnalysisFixture};
use beatsync_test_utils::MockSpotifyServer;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

// =============================================================================
// Helpers
// =============================================================================

fn client_for(server: &MockSpotifyServer) -> SpotifyClient {
    let config = SpotifyConfig {
        cookie: Some("sp_dc=test".to_string()),
        max_retries: 1,
        ..SpotifyConfig::with_url(server.url())
    };
    SpotifyClient::new(&config).unwrap()
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

// =============================================================================
// Tokens and discovery
// =============================================================================

#[tokio::test]
async fn test_access_token_is_minted_from_cookie() {
    let server = MockSpotifyServer::start().await;
    server.mock_access_token("token-1").await;

    let token = client_for(&server).get_access_token().await.unwrap();

    assert_eq!(token.access_token, "token-1");
    assert_eq!(token.client_id, "test-client");
    assert!(!format!("{:?}", token).contains("token-1"));
}

#[tokio::test]
async fn test_dealer_discovery_builds_websocket_url() {
    let server = MockSpotifyServer::start().await;
    server.mock_dealers("dealer.example.com:443").await;

    let discovery = client_for(&server).discover_dealers().await.unwrap();

    assert_eq!(
        discovery.websocket_url("abc").as_deref(),
        Some("wss://dealer.example.com/?access_token=abc")
    );
}

// =============================================================================
// Tracks
// =============================================================================

#[tokio::test]
async fn test_tracks_are_keyed_by_id_and_unknown_ids_dropped() {
    let server = MockSpotifyServer::start().await;
    server
        .mock_tracks(vec![track_json("a", "Song A"), track_json("b", "Song B")])
        .await;

    let tracks = client_for(&server)
        .get_tracks(&ids(&["a", "missing", "b"]), "token")
        .await
        .unwrap();

    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks["a"].name, "Song A");
    assert_eq!(tracks["b"].name, "Song B");
    assert_eq!(
        server.requested_track_ids().await,
        vec![ids(&["a", "missing", "b"])]
    );
}

#[tokio::test]
async fn test_tracks_are_requested_in_chunks_of_fifty() {
    let server = MockSpotifyServer::start().await;
    server.mock_tracks(vec![]).await;

    let many: Vec<String> = (0..120).map(|i| format!("t{}", i)).collect();
    client_for(&server).get_tracks(&many, "token").await.unwrap();

    let sizes: Vec<usize> = server
        .requested_track_ids()
        .await
        .iter()
        .map(Vec::len)
        .collect();
    assert_eq!(sizes, vec![50, 50, 20]);
}

#[tokio::test]
async fn test_expired_track_token() {
    let server = MockSpotifyServer::start().await;
    server.mock_tracks_token_expired("old").await;

    let result = client_for(&server).get_tracks(&ids(&["a"]), "old").await;

    assert!(matches!(result, Err(ref e) if e.is_token_expired()));
}

// =============================================================================
// Audio analysis
// =============================================================================

#[tokio::test]
async fn test_audio_analysis_is_parsed() {
    let server = MockSpotifyServer::start().await;
    server
        .mock_audio_analysis("a", AnalysisFixture::steady(8.0, 0.5).to_json())
        .await;

    let analysis = client_for(&server)
        .get_audio_analysis("a", "token")
        .await
        .unwrap();

    assert_eq!(analysis.beats.len(), 16);
    assert_eq!(analysis.bars.len(), 4);
    assert_eq!(analysis.segments[1].interval.start, 0.5);
    assert_eq!(analysis.track.duration, 8.0);
}

#[tokio::test]
async fn test_missing_audio_analysis_is_not_found() {
    let server = MockSpotifyServer::start().await;
    server.mock_audio_analysis_not_found("a").await;

    let result = client_for(&server).get_audio_analysis("a", "token").await;

    assert!(matches!(result, Err(SpotifyError::NotFound(ref id)) if id == "a"));
}

#[tokio::test]
async fn test_expired_analysis_token() {
    let server = MockSpotifyServer::start().await;
    server.mock_audio_analysis_token_expired("old").await;

    let result = client_for(&server).get_audio_analysis("a", "old").await;

    assert!(matches!(result, Err(ref e) if e.is_token_expired()));
}

#[tokio::test]
async fn test_blank_analysis_id_is_rejected_locally() {
    let server = MockSpotifyServer::start().await;

    let result = client_for(&server).get_audio_analysis("  ", "token").await;

    assert!(matches!(result, Err(SpotifyError::InvalidInput(_))));
    assert!(server.received_paths().await.is_empty());
}

// =============================================================================
// Device registration
// =============================================================================

#[tokio::test]
async fn test_connect_state_returns_cluster() {
    let server = MockSpotifyServer::start().await;
    server
        .mock_connect_state("dev1", json!({ "active_device_id": "d1" }))
        .await;

    let cluster: Value = client_for(&server)
        .connect_state("conn-1", "token", "dev1")
        .await
        .unwrap();

    assert_eq!(cluster["active_device_id"], "d1");
}

#[tokio::test]
async fn test_connect_state_sends_connection_id() {
    let server = MockSpotifyServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/connect-state/v1/devices/hobs_dev1"))
        .and(header("x-spotify-connection-id", "conn-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(server.inner())
        .await;

    let result: Result<Value, _> = client_for(&server)
        .connect_state("conn-1", "token", "dev1")
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_notification_subscription() {
    let server = MockSpotifyServer::start().await;
    server.mock_notifications().await;

    client_for(&server)
        .subscribe_to_notifications("conn-1", "token")
        .await
        .unwrap();

    assert_eq!(server.received_paths().await, vec!["/v1/me/notifications/user"]);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_server_errors_are_retried_then_reported() {
    let server = MockSpotifyServer::start().await;
    server.mock_server_error("/v1/audio-analysis").await;

    let result = client_for(&server).get_audio_analysis("a", "token").await;

    assert!(matches!(result, Err(SpotifyError::Api { status: 500, .. })));
    // One attempt plus one retry
    assert_eq!(server.received_paths().await.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_is_reported() {
    let server = MockSpotifyServer::start().await;
    server.mock_rate_limit("/v1/tracks").await;

    let result = client_for(&server).get_tracks(&ids(&["a"]), "token").await;

    assert!(matches!(result, Err(SpotifyError::RateLimited)));
}
