//! Shared test utilities for the beatsync workspace
//!
//! This crate provides mock implementations of external services and wire
//! fixtures for testing without network dependencies. It depends on no
//! other workspace crate so every crate can use it as a dev-dependency.
//!
//! # Mock Services
//!
//! - [`MockSpotifyServer`] - Mock Spotify Web API, token and connect-state endpoints
//! - [`MockCacheStore`] - In-memory keyed store recording lookups and writes
//!
//! # Fixtures
//!
//! The [`fixtures`] module builds dealer frames, clusters, player states,
//! tracks and audio analyses in their wire shape.
//!
//! # Example
//!
//! ```rust,ignore
//! use beatsync_test_utils::{fixtures::track_json, MockSpotifyServer};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let spotify = MockSpotifyServer::start().await;
//!     spotify.mock_access_token("token").await;
//!     spotify.mock_tracks(vec![track_json("a", "Song A")]).await;
//!
//!     // Use SpotifyConfig::with_url(spotify.url()) to configure your client
//! }
//! ```

mod cache;
pub mod fixtures;
mod spotify;

pub use cache::MockCacheStore;
pub use spotify::{MockSpotifyServer, EXPIRED_TOKEN_MESSAGE};
