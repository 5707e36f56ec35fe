//! Redis configuration types for the resolver cache

use crate::{get_env_or_default, optional_env, parse_env, ConfigResult};

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Optional password for Redis authentication
    pub password: Option<String>,

    /// Prefix prepended to every cache key
    pub key_prefix: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    /// Load Redis configuration from environment variables
    ///
    /// Returns `None` when `REDIS_URL` is unset; the resolvers then run
    /// without a cache.
    pub fn from_env() -> ConfigResult<Option<Self>> {
        let Some(url) = optional_env("REDIS_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            password: optional_env("REDIS_PASSWORD"),
            key_prefix: get_env_or_default("REDIS_KEY_PREFIX", "beatsync"),
            connect_timeout_secs: parse_env("REDIS_CONNECT_TIMEOUT", 5)?,
        }))
    }

    /// Create a configuration with a custom URL (useful for testing)
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build the full connection URL including password if set
    pub fn connection_url(&self) -> String {
        if let Some(ref password) = self.password {
            if let Some(at_pos) = self.url.find("://") {
                let (scheme, rest) = self.url.split_at(at_pos + 3);
                return format!("{}:{}@{}", scheme, password, rest);
            }
        }
        self.url.clone()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            password: None,
            key_prefix: "beatsync".to_string(),
            connect_timeout_secs: 5,
        }
    }
}
