//! Configuration error types

use thiserror::Error;

/// Errors raised while loading configuration from the environment
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable the caller cannot run without is unset
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A variable is set but does not parse into the expected type
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Values parsed but are out of the accepted range
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
