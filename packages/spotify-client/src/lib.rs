//! Spotify Web API client for beatsync
//!
//! This crate provides a client for the Spotify endpoints the playback
//! synchronizer depends on:
//! - Access token minting from an open.spotify.com cookie
//! - Dealer discovery and connect-state registration
//! - Track metadata and audio analysis retrieval
//!
//! # Example
//!
//! ```rust,no_run
//! use beatsync_shared_config::SpotifyConfig;
//! use beatsync_spotify_client::SpotifyClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SpotifyClient::new(&SpotifyConfig::from_env()?)?;
//! let token = client.get_access_token().await?;
//!
//! let analysis = client
//!     .get_audio_analysis("4uLU6hMCjMI75M1A2tKUQC", &token.access_token)
//!     .await?;
//! println!("{} bars", analysis.bars.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Variables
//!
//! - `SPOTIFY_COOKIE`: open.spotify.com cookie used to mint tokens
//! - `SPOTIFY_API_URL`: Web API base URL (default: `https://api.spotify.com`)

mod client;
mod error;
mod models;

pub use client::SpotifyClient;
pub use error::{SpotifyError, SpotifyResult, TOKEN_EXPIRED_MESSAGE};
pub use models::{
    AccessToken, Album, AnalysisResult, AnalysisTrack, Artist, DealerDiscovery, Image, Interval,
    Section, Segment, TimeInterval, Track,
};
