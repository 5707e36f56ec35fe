//! Error types for the synchronization pipeline

use beatsync_spotify_client::SpotifyError;
use thiserror::Error;

/// Top-level error for socket and facade operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Inbound frame or outbound payload could not be (de)serialized
    #[error("Failed to decode dealer frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The outbound channel has no receiver
    #[error("Dealer transport is closed")]
    TransportClosed,

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Track or analysis resolution failed
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),
}

/// Error returned by a message handler
///
/// Handler errors are logged by the router and never reach other handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The message payload did not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON decoding failed
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Cache backend errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Cached value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connecting to the backend took too long
    #[error("Cache connection timed out")]
    Timeout,
}

/// Track and analysis resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The external API failed, including a second token expiry
    #[error("Spotify API error: {0}")]
    Api(#[from] SpotifyError),

    /// A replacement access token could not be minted
    #[error("Failed to regenerate access token: {0}")]
    TokenRegeneration(#[source] SpotifyError),
}

impl ResolveError {
    /// Whether the failure was an expired token that survived one regeneration
    pub fn is_token_expired(&self) -> bool {
        matches!(self, ResolveError::Api(e) if e.is_token_expired())
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
