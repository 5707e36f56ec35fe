//! Spotify API error types

use thiserror::Error;

/// Body message the audio analysis endpoint sends for an expired token
pub const TOKEN_EXPIRED_MESSAGE: &str = "The access token expired";

/// Spotify API client errors
#[derive(Error, Debug)]
pub enum SpotifyError {
    /// No cookie configured to mint access tokens
    #[error("a Spotify cookie is required to generate access tokens")]
    MissingCookie,

    /// Invalid input provided to API method
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse Spotify response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The access token was rejected and must be regenerated
    #[error("Spotify access token expired ({status}): {message}")]
    TokenExpired { status: u16, message: String },

    /// Spotify returned an error
    #[error("Spotify API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by Spotify
    #[error("Rate limited by Spotify API")]
    RateLimited,

    /// Request timeout
    #[error("Request to Spotify timed out")]
    Timeout,
}

impl SpotifyError {
    /// Whether the caller should regenerate its token and retry once
    pub fn is_token_expired(&self) -> bool {
        matches!(self, SpotifyError::TokenExpired { .. })
    }

    /// Check if this error is retryable (transient failure)
    ///
    /// Retries on timeouts, rate limiting, transport errors and 5xx.
    /// Token expiry is handled by the resolvers, not by the retry loop.
    pub fn is_retryable(&self) -> bool {
        match self {
            SpotifyError::Timeout | SpotifyError::RateLimited => true,
            SpotifyError::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                matches!(e.status(), Some(status) if status.is_server_error())
            }
            SpotifyError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for Spotify operations
pub type SpotifyResult<T> = Result<T, SpotifyError>;
