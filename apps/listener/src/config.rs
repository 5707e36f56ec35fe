//! Listener configuration loaded from environment variables

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use beatsync_shared_config::{CommonConfig, RedisConfig, SpotifyConfig, SyncConfig};

/// Listener configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with the libraries
    pub common: CommonConfig,

    /// Delay before reconnecting after the dealer closed the connection
    pub reconnect_delay_secs: u64,

    /// Id of the hidden device registered with connect-state
    pub device_id: String,

    /// Resolve and log full track metadata on every track change
    pub resolve_tracks: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env().context("Failed to load config")?;
        common
            .spotify
            .require_cookie()
            .context("The listener mints its own access tokens")?;

        Ok(Self {
            common,

            reconnect_delay_secs: env::var("LISTENER_RECONNECT_DELAY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid LISTENER_RECONNECT_DELAY value")?,

            device_id: env::var("LISTENER_DEVICE_ID")
                .ok()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),

            resolve_tracks: env::var("LISTENER_RESOLVE_TRACKS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid LISTENER_RESOLVE_TRACKS value")?,
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn spotify(&self) -> &SpotifyConfig {
        &self.common.spotify
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.common.sync
    }

    /// Get Redis configuration (if configured)
    pub fn redis(&self) -> Option<&RedisConfig> {
        self.common.redis.as_ref()
    }
}
