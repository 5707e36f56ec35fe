//! Lifecycle events derived from player state diffs

use std::sync::Arc;

use tracing::debug;

use crate::diff::DiffNode;
use crate::events::{EventBus, PlaybackEvent};
use crate::observer::{DeviceChange, DeviceObserver, Observer, PlayerStateObserver};
use crate::model::{PlayerState, PlayerStateDiff};
use crate::socket::DealerSocket;

/// Discrete playback transition of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Paused,
    Resumed,
    Track,
    Position,
    Duration,
    Started,
    Stopped,
    Options,
}

impl Lifecycle {
    pub fn into_event(self, state: Arc<PlayerState>) -> PlaybackEvent {
        match self {
            Lifecycle::Paused => PlaybackEvent::Paused(state),
            Lifecycle::Resumed => PlaybackEvent::Resumed(state),
            Lifecycle::Track => PlaybackEvent::Track(state),
            Lifecycle::Position => PlaybackEvent::Position(state),
            Lifecycle::Duration => PlaybackEvent::Duration(state),
            Lifecycle::Started => PlaybackEvent::Started(state),
            Lifecycle::Stopped => PlaybackEvent::Stopped(state),
            Lifecycle::Options => PlaybackEvent::Options(state),
        }
    }
}

/// Events implied by a diff, in a fixed order
///
/// `paused`/`resumed`, `track`, `position`, `duration`, `started`/`stopped`,
/// then `options` when any shuffle or repeat flag changed.
pub fn map_lifecycle(diff: &PlayerStateDiff, state: &PlayerState) -> Vec<Lifecycle> {
    let mut events = Vec::new();

    if diff.is_paused.is_different() {
        events.push(if state.is_paused {
            Lifecycle::Paused
        } else {
            Lifecycle::Resumed
        });
    }
    if diff.track.uri.is_different() {
        events.push(Lifecycle::Track);
    }
    if diff.position_as_of_timestamp.is_different() {
        events.push(Lifecycle::Position);
    }
    if diff.duration.is_different() {
        events.push(Lifecycle::Duration);
    }
    if diff.is_playing.is_different() {
        events.push(if state.is_playing {
            Lifecycle::Started
        } else {
            Lifecycle::Stopped
        });
    }
    if diff.options.is_changed() {
        events.push(Lifecycle::Options);
    }

    events
}

/// Lifecycle, device and volume events of every observed socket
///
/// Events are handed to the sink synchronously while the dealer message is
/// being dispatched.
pub struct PlayerStateEvents {
    states: PlayerStateObserver,
    devices: DeviceObserver,
}

impl PlayerStateEvents {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(PlaybackEvent) + Send + Sync + 'static,
    {
        let sink = Arc::new(sink);
        let state_sink = sink.clone();

        let states = PlayerStateObserver::new(move |changes| {
            for change in changes {
                let lifecycle = map_lifecycle(&change.diff, &change.state);
                debug!(
                    session_id = %change.state.session_id,
                    events = ?lifecycle,
                    "Mapped player state change"
                );
                for event in lifecycle {
                    state_sink(event.into_event(change.state.clone()));
                }
            }
        });

        let devices = DeviceObserver::new(move |changes| {
            for change in changes {
                sink(match change {
                    DeviceChange::Active { device_id, device } => {
                        PlaybackEvent::Device { device_id, device }
                    }
                    DeviceChange::Volume { device_id, volume } => {
                        PlaybackEvent::Volume { device_id, volume }
                    }
                });
            }
        });

        Self { states, devices }
    }

    /// Publish every event on a bus
    pub fn with_bus(bus: EventBus) -> Self {
        Self::new(move |event| bus.publish(event))
    }
}

impl Observer for PlayerStateEvents {
    fn observe(&self, socket: &Arc<DealerSocket>) {
        self.states.observe(socket);
        self.devices.observe(socket);
    }

    fn unobserve(&self, socket: &Arc<DealerSocket>) {
        self.states.unobserve(socket);
        self.devices.unobserve(socket);
    }

    fn disconnect(&self) {
        self.states.disconnect();
        self.devices.disconnect();
    }
}
