//! Environment-driven configuration for beatsync
//!
//! The listener and the core library read the same variables through
//! these types. Every value has a default except the Spotify cookie,
//! which only the listener requires.

mod error;
mod redis;
mod spotify;
mod sync;

pub use error::{ConfigError, ConfigResult};
pub use redis::RedisConfig;
pub use spotify::SpotifyConfig;
pub use sync::{SyncConfig, MAX_LOOKAHEAD_TRACKS};

use std::env;

/// Configuration shared by every beatsync component
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub spotify: SpotifyConfig,

    /// State pipeline and scheduler tuning
    pub sync: SyncConfig,

    /// Resolver cache; `None` keeps the caches in memory
    pub redis: Option<RedisConfig>,
}

impl CommonConfig {
    /// Load and validate everything from the environment
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            spotify: SpotifyConfig::from_env()?,
            sync: SyncConfig::from_env()?,
            redis: RedisConfig::from_env()?,
        })
    }
}

/// Non-empty value of a variable
pub fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

pub fn get_env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable, falling back to `default` when it is unset
pub fn parse_env<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_count_as_unset() {
        temp_env::with_var("BEATSYNC_TEST_EMPTY", Some(""), || {
            assert_eq!(optional_env("BEATSYNC_TEST_EMPTY"), None);
            assert_eq!(get_env_or_default("BEATSYNC_TEST_EMPTY", "fallback"), "fallback");
            assert_eq!(parse_env("BEATSYNC_TEST_EMPTY", 3u8).unwrap(), 3);
        });
    }

    #[test]
    fn test_parse_env_default_and_override() {
        temp_env::with_var_unset("BEATSYNC_TEST_NUMBER", || {
            assert_eq!(parse_env("BEATSYNC_TEST_NUMBER", 7u32).unwrap(), 7);
        });
        temp_env::with_var("BEATSYNC_TEST_NUMBER", Some("42"), || {
            assert_eq!(parse_env("BEATSYNC_TEST_NUMBER", 7u32).unwrap(), 42);
        });
    }

    #[test]
    fn test_parse_env_reports_the_variable() {
        temp_env::with_var("BEATSYNC_TEST_NUMBER", Some("many"), || {
            assert!(matches!(
                parse_env("BEATSYNC_TEST_NUMBER", 7u32),
                Err(ConfigError::InvalidValue(name, _)) if name == "BEATSYNC_TEST_NUMBER"
            ));
        });
    }

    #[test]
    fn test_common_config_without_redis() {
        temp_env::with_vars(
            [("REDIS_URL", None::<&str>), ("SYNC_DEFER_MS", Some("250"))],
            || {
                let config = CommonConfig::from_env().unwrap();
                assert!(config.redis.is_none());
                assert_eq!(config.sync.defer_ms, 250);
            },
        );
    }
}
