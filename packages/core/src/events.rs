//! Playback events and the broadcast bus carrying them

use std::sync::Arc;

use beatsync_spotify_client::{AnalysisResult, Section, Segment, TimeInterval, Track};
use tokio::sync::broadcast;
use tracing::trace;

use crate::lifecycle::Lifecycle;
use crate::model::{ClusterDevice, PlayerState};

/// Segment boundary with the two segments that follow it
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEvent {
    pub current: Segment,
    pub next: Option<Segment>,
    pub second_next: Option<Segment>,
}

/// Everything observable through [`PlaybackSync`](crate::PlaybackSync)
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Paused(Arc<PlayerState>),
    Resumed(Arc<PlayerState>),
    Started(Arc<PlayerState>),
    Stopped(Arc<PlayerState>),
    Track(Arc<PlayerState>),
    Position(Arc<PlayerState>),
    Duration(Arc<PlayerState>),
    /// Shuffle or repeat flags changed
    Options(Arc<PlayerState>),
    /// The active device changed; `device` is `None` if the cluster does not list it
    Device {
        device_id: String,
        device: Option<ClusterDevice>,
    },
    Volume {
        device_id: String,
        volume: u32,
    },
    /// Full metadata of a state's current track
    TrackResolved {
        state: Arc<PlayerState>,
        track: Arc<Track>,
    },
    Tatum(TimeInterval),
    Beat(TimeInterval),
    Bar(TimeInterval),
    Segment(SegmentEvent),
    Section(Section),
    /// A new analysis was attached to the scheduler
    Change(Arc<AnalysisResult>),
    /// The dealer connection closed
    Close,
}

impl PlaybackEvent {
    /// Stable lowercase name, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackEvent::Paused(_) => "paused",
            PlaybackEvent::Resumed(_) => "resumed",
            PlaybackEvent::Started(_) => "started",
            PlaybackEvent::Stopped(_) => "stopped",
            PlaybackEvent::Track(_) => "track",
            PlaybackEvent::Position(_) => "position",
            PlaybackEvent::Duration(_) => "duration",
            PlaybackEvent::Options(_) => "options",
            PlaybackEvent::Device { .. } => "device",
            PlaybackEvent::Volume { .. } => "volume",
            PlaybackEvent::TrackResolved { .. } => "track_resolved",
            PlaybackEvent::Tatum(_) => "tatum",
            PlaybackEvent::Beat(_) => "beat",
            PlaybackEvent::Bar(_) => "bar",
            PlaybackEvent::Segment(_) => "segment",
            PlaybackEvent::Section(_) => "section",
            PlaybackEvent::Change(_) => "change",
            PlaybackEvent::Close => "close",
        }
    }

    /// The lifecycle kind and state of a lifecycle event
    pub fn as_lifecycle(&self) -> Option<(Lifecycle, &Arc<PlayerState>)> {
        let lifecycle = match self {
            PlaybackEvent::Paused(state) => (Lifecycle::Paused, state),
            PlaybackEvent::Resumed(state) => (Lifecycle::Resumed, state),
            PlaybackEvent::Started(state) => (Lifecycle::Started, state),
            PlaybackEvent::Stopped(state) => (Lifecycle::Stopped, state),
            PlaybackEvent::Track(state) => (Lifecycle::Track, state),
            PlaybackEvent::Position(state) => (Lifecycle::Position, state),
            PlaybackEvent::Duration(state) => (Lifecycle::Duration, state),
            PlaybackEvent::Options(state) => (Lifecycle::Options, state),
            _ => return None,
        };
        Some(lifecycle)
    }
}

/// Multi-consumer channel of [`PlaybackEvent`]s
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the producer.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send to every current subscriber; events without subscribers are dropped
    pub fn publish(&self, event: PlaybackEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "Published event"),
            Err(_) => trace!(event = name, "No subscribers for event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
