//! The `PlaybackSync` facade
//!
//! Wires the lifecycle mapper, the resolvers and the scheduler to one
//! [`EventBus`]. Lifecycle events are forwarded to the scheduler as they
//! are published; resolved analyses are attached to it through the
//! discriminator.

use std::sync::Arc;

use beatsync_shared_config::SyncConfig;
use beatsync_spotify_client::{AnalysisResult, Track};
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::events::{EventBus, PlaybackEvent};
use crate::lifecycle::PlayerStateEvents;
use crate::observer::Observer;
use crate::position::{Clock, SystemClock};
use crate::resolver::{
    AnalysisApi, AnalysisUpdate, AudioAnalysisObserver, PlayerTrackResolver, TokenSource, TrackApi,
};
use crate::scheduler::{Phase, SchedulerConfig, SchedulerHandle};
use crate::socket::{DealerSocket, SocketEvent};

/// Picks the update the scheduler follows out of a resolved batch
pub type Discriminator = Arc<dyn Fn(&[AnalysisUpdate]) -> Option<usize> + Send + Sync>;

/// Default discriminator: the first update of the batch
pub fn first_update(updates: &[AnalysisUpdate]) -> Option<usize> {
    (!updates.is_empty()).then_some(0)
}

// =============================================================================
// Audio analysis events
// =============================================================================

/// Resolves analyses and attaches the chosen one to a scheduler
pub struct AudioAnalysisEvents {
    observer: AudioAnalysisObserver,
    scheduler: Arc<SchedulerHandle>,
}

impl AudioAnalysisEvents {
    pub fn new(
        api: Arc<dyn AnalysisApi>,
        tokens: Arc<TokenSource>,
        cache: Option<Arc<dyn Cache<AnalysisResult>>>,
        lookahead: usize,
        scheduler: Arc<SchedulerHandle>,
        discriminator: Discriminator,
    ) -> Self {
        let target = scheduler.clone();
        let observer = AudioAnalysisObserver::new(api, tokens, cache, lookahead, move |updates| {
            let Some(update) = discriminator(&updates).and_then(|index| updates.get(index)) else {
                debug!(batch = updates.len(), "Discriminator chose no analysis");
                return;
            };
            debug!(
                session_id = %update.state.session_id,
                track = %update.state.track.uri,
                "Attaching analysis"
            );
            target.attach(update.analysis.clone(), update.state.clone());
        });

        Self {
            observer,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Arc<SchedulerHandle> {
        &self.scheduler
    }
}

impl Observer for AudioAnalysisEvents {
    fn observe(&self, socket: &Arc<DealerSocket>) {
        self.observer.observe(socket);
    }

    fn unobserve(&self, socket: &Arc<DealerSocket>) {
        self.observer.unobserve(socket);
    }

    fn disconnect(&self) {
        self.observer.disconnect();
    }
}

// =============================================================================
// Facade
// =============================================================================

/// Optional collaborators and tuning of a [`PlaybackSync`]
#[derive(Clone)]
pub struct PlaybackSyncOptions {
    pub sync: SyncConfig,
    pub analysis_cache: Option<Arc<dyn Cache<AnalysisResult>>>,
    pub track_cache: Option<Arc<dyn Cache<Track>>>,
    /// Emit `TrackResolved` events with full track metadata
    pub resolve_tracks: bool,
    pub discriminator: Discriminator,
    pub clock: Arc<dyn Clock>,
}

impl Default for PlaybackSyncOptions {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            analysis_cache: None,
            track_cache: None,
            resolve_tracks: false,
            discriminator: Arc::new(first_update),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for PlaybackSyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSyncOptions")
            .field("sync", &self.sync)
            .field("analysis_cache", &self.analysis_cache.is_some())
            .field("track_cache", &self.track_cache.is_some())
            .field("resolve_tracks", &self.resolve_tracks)
            .finish()
    }
}

/// Playback lifecycle, device and beat-level events of observed sockets
///
/// Must be created inside a tokio runtime.
pub struct PlaybackSync {
    bus: EventBus,
    states: PlayerStateEvents,
    analyses: AudioAnalysisEvents,
    tracks: Option<PlayerTrackResolver>,
    close_forwarders: DashMap<usize, JoinHandle<()>>,
}

impl PlaybackSync {
    pub fn new<A>(api: Arc<A>, tokens: Arc<TokenSource>, options: PlaybackSyncOptions) -> Self
    where
        A: TrackApi + AnalysisApi + 'static,
    {
        let bus = EventBus::new(options.sync.event_capacity);

        let scheduler_bus = bus.clone();
        let scheduler = Arc::new(SchedulerHandle::spawn(
            SchedulerConfig::from_sync(&options.sync),
            options.clock.clone(),
            Arc::new(move |event: PlaybackEvent| scheduler_bus.publish(event)),
        ));

        let lifecycle_bus = bus.clone();
        let lifecycle_scheduler = scheduler.clone();
        let states = PlayerStateEvents::new(move |event: PlaybackEvent| {
            if let Some((lifecycle, state)) = event.as_lifecycle() {
                lifecycle_scheduler.lifecycle(lifecycle, state.clone());
            }
            lifecycle_bus.publish(event);
        });

        let analyses = AudioAnalysisEvents::new(
            api.clone(),
            tokens.clone(),
            options.analysis_cache.clone(),
            options.sync.lookahead_tracks,
            scheduler,
            options.discriminator.clone(),
        );

        let tracks = options.resolve_tracks.then(|| {
            let track_bus = bus.clone();
            PlayerTrackResolver::new(api, tokens, options.track_cache.clone(), move |resolved| {
                for resolution in resolved {
                    track_bus.publish(PlaybackEvent::TrackResolved {
                        state: resolution.state,
                        track: resolution.track,
                    });
                }
            })
        });

        Self {
            bus,
            states,
            analyses,
            tracks,
            close_forwarders: DashMap::new(),
        }
    }

    /// Receiver of every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler_phase(&self) -> Phase {
        self.analyses.scheduler().phase()
    }

    fn forward_close(&self, socket: &Arc<DealerSocket>) {
        let key = Arc::as_ptr(socket) as usize;
        if self.close_forwarders.contains_key(&key) {
            return;
        }

        let mut events = socket.subscribe_events();
        let bus = self.bus.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SocketEvent::Closed) => bus.publish(PlaybackEvent::Close),
                    Ok(SocketEvent::ConnectionId(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Close forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.close_forwarders.insert(key, task);
    }
}

impl Observer for PlaybackSync {
    fn observe(&self, socket: &Arc<DealerSocket>) {
        // Lifecycle handlers go first so the scheduler sees a track change
        // before any analysis resolved for it
        self.states.observe(socket);
        self.analyses.observe(socket);
        if let Some(tracks) = &self.tracks {
            tracks.observe(socket);
        }
        self.forward_close(socket);
        info!("Observing dealer socket");
    }

    fn unobserve(&self, socket: &Arc<DealerSocket>) {
        self.states.unobserve(socket);
        self.analyses.unobserve(socket);
        if let Some(tracks) = &self.tracks {
            tracks.unobserve(socket);
        }
        // Detached; the forwarder ends once the socket is dropped
        self.close_forwarders.remove(&(Arc::as_ptr(socket) as usize));
    }

    fn disconnect(&self) {
        self.states.disconnect();
        self.analyses.disconnect();
        if let Some(tracks) = &self.tracks {
            tracks.disconnect();
        }
        self.close_forwarders.retain(|_, task| {
            task.abort();
            false
        });
        info!("Disconnected from every dealer socket");
    }
}

impl Drop for PlaybackSync {
    fn drop(&mut self) {
        for entry in self.close_forwarders.iter() {
            entry.value().abort();
        }
    }
}
