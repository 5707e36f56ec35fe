//! Playback synchronization core for beatsync
//!
//! Consumes Spotify connect-state cluster snapshots pushed over the dealer
//! WebSocket and turns them into two streams of events:
//! - Discrete lifecycle events (track changed, paused, resumed, started,
//!   stopped, position, duration, options) derived from per-session diffs
//! - Real-time tatum, beat, bar, segment and section events fired at the
//!   moments predicted from the track's audio analysis
//!
//! The transport is left to the caller: feed text frames into a
//! [`DealerSocket`] and drain the outbound receiver it returns.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use beatsync_core::{DealerSocket, Observer, PlaybackSync, PlaybackSyncOptions, TokenSource};
//! use beatsync_shared_config::SpotifyConfig;
//! use beatsync_spotify_client::SpotifyClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(SpotifyClient::new(&SpotifyConfig::from_env()?)?);
//! let token = client.get_access_token().await?;
//! let tokens = Arc::new(TokenSource::new(token.access_token, client.clone()));
//!
//! let sync = PlaybackSync::new(client, tokens, PlaybackSyncOptions::default());
//! let mut events = sync.subscribe();
//!
//! let (socket, _outbound) = DealerSocket::new(Duration::from_secs(30));
//! sync.observe(&socket);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod diff;
pub mod error;
pub mod events;
pub mod facade;
pub mod lifecycle;
pub mod model;
pub mod observer;
pub mod position;
pub mod resolver;
pub mod scheduler;
pub mod socket;

pub use cache::{Cache, MemoryCache, RedisCache};
pub use diff::{DiffNode, Diffable, Leaf};
pub use error::{CacheError, CoreError, CoreResult, HandlerError, ResolveError};
pub use events::{EventBus, PlaybackEvent, SegmentEvent};
pub use facade::{first_update, AudioAnalysisEvents, Discriminator, PlaybackSync, PlaybackSyncOptions};
pub use lifecycle::{map_lifecycle, Lifecycle, PlayerStateEvents};
pub use model::{Cluster, ClusterDevice, ClusterUpdate, PlayerState, PlayerStateDiff};
pub use observer::{
    ClusterObserver, DeviceChange, DeviceObserver, Observer, PlayerStateObserver, SessionStore,
    StateChange,
};
pub use position::{position_ms, position_secs, Clock, MonotonicClock, SystemClock};
pub use resolver::{
    AnalysisApi, AnalysisUpdate, AudioAnalysisObserver, PlayerTrackResolver, TokenRegenerator,
    TokenSource, TrackApi, TrackResolution,
};
pub use scheduler::{Category, Phase, SchedulerConfig, SchedulerHandle};
pub use socket::{DealerMessage, DealerPayload, DealerSocket, MessageHandler, SocketEvent};
