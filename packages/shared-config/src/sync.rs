//! Synchronization and scheduling configuration types

use std::time::Duration;

use crate::{parse_env, ConfigError, ConfigResult};

/// Most queued tracks whose analyses are fetched ahead of time
pub const MAX_LOOKAHEAD_TRACKS: usize = 5;

/// Tuning for the state pipeline and the sub-event scheduler
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between a pong and the next keep-alive ping, in seconds
    pub ping_interval_secs: u64,

    /// Number of queued tracks resolved ahead of time
    pub lookahead_tracks: usize,

    /// Debounce window for the play/pause re-evaluation, in milliseconds
    pub update_debounce_ms: u64,

    /// Retry delay when no interval covers the current position, in milliseconds
    pub defer_ms: u64,

    /// Positions below this (seconds) force the first interval of each category
    pub close_to_start_secs: f64,

    /// Capacity of the broadcast channel carrying playback events
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Load sync configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            ping_interval_secs: parse_env("SYNC_PING_INTERVAL_SECS", 30)?,
            lookahead_tracks: parse_env("SYNC_LOOKAHEAD_TRACKS", 5)?,
            update_debounce_ms: parse_env("SYNC_UPDATE_DEBOUNCE_MS", 50)?,
            defer_ms: parse_env("SYNC_DEFER_MS", 1000)?,
            close_to_start_secs: parse_env("SYNC_CLOSE_TO_START_SECS", 2.0)?,
            event_capacity: parse_env("SYNC_EVENT_CAPACITY", 256)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "SYNC_EVENT_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "SYNC_PING_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.lookahead_tracks > MAX_LOOKAHEAD_TRACKS {
            return Err(ConfigError::ValidationError(format!(
                "SYNC_LOOKAHEAD_TRACKS must be at most {}",
                MAX_LOOKAHEAD_TRACKS
            )));
        }
        if self.defer_ms == 0 {
            return Err(ConfigError::ValidationError(
                "SYNC_DEFER_MS must be greater than zero".to_string(),
            ));
        }
        if !self.close_to_start_secs.is_finite() || self.close_to_start_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "SYNC_CLOSE_TO_START_SECS must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn update_debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    pub fn defer(&self) -> Duration {
        Duration::from_millis(self.defer_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            lookahead_tracks: 5,
            update_debounce_ms: 50,
            defer_ms: 1000,
            close_to_start_secs: 2.0,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.lookahead_tracks, 5);
        assert_eq!(config.update_debounce(), Duration::from_millis(50));
        assert_eq!(config.defer(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = SyncConfig {
            event_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ping_interval() {
        let config = SyncConfig {
            ping_interval_secs: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_caps_lookahead() {
        let at_cap = SyncConfig {
            lookahead_tracks: MAX_LOOKAHEAD_TRACKS,
            ..SyncConfig::default()
        };
        assert!(at_cap.validate().is_ok());

        temp_env::with_var("SYNC_LOOKAHEAD_TRACKS", Some("20"), || {
            assert!(matches!(
                SyncConfig::from_env(),
                Err(ConfigError::ValidationError(message)) if message.contains("SYNC_LOOKAHEAD_TRACKS")
            ));
        });
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let config = SyncConfig {
            close_to_start_secs: -1.0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            [
                ("SYNC_LOOKAHEAD_TRACKS", Some("3")),
                ("SYNC_DEFER_MS", Some("250")),
            ],
            || {
                let config = SyncConfig::from_env().unwrap();
                assert_eq!(config.lookahead_tracks, 3);
                assert_eq!(config.defer_ms, 250);
            },
        );
    }

    #[test]
    fn test_from_env_invalid_value() {
        temp_env::with_var("SYNC_PING_INTERVAL_SECS", Some("soon"), || {
            assert!(matches!(
                SyncConfig::from_env(),
                Err(ConfigError::InvalidValue(_, _))
            ));
        });
    }
}
