//! Playback position estimation
//!
//! The position reported by connect-state is frozen at the moment the
//! server took its `timestamp`. While playing, the current position is
//! extrapolated with the local clock; clock skew is not corrected.

use tokio::time::Instant;

use crate::model::PlayerState;

/// Source of wall-clock time in Unix milliseconds
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock that advances with the tokio timer
///
/// Anchored on a Unix time at creation. Under a paused runtime it only
/// moves when the test advances time, which makes scheduling deterministic.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin_ms: i64,
    anchor: Instant,
}

impl MonotonicClock {
    /// Anchor on the current system time
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    /// Anchor on an explicit Unix time
    pub fn starting_at(origin_ms: i64) -> Self {
        Self {
            origin_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.origin_ms + self.anchor.elapsed().as_millis() as i64
    }
}

/// Current offset into the track in milliseconds
///
/// Paused states report their frozen position unchanged. May exceed the
/// track duration near the end.
pub fn position_ms(state: &PlayerState, clock: &dyn Clock) -> i64 {
    if state.is_paused {
        return state.position_as_of_timestamp;
    }
    state.position_as_of_timestamp + (clock.now_ms() - state.timestamp)
}

/// [`position_ms`] in seconds, the unit of audio analysis intervals
pub fn position_secs(state: &PlayerState, clock: &dyn Clock) -> f64 {
    position_ms(state, clock) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlaybackQuality, PlayerIndex, PlayerOptions, PlayerTrack};

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    fn state(is_paused: bool, position: i64, timestamp: i64) -> PlayerState {
        PlayerState {
            session_id: "S1".to_string(),
            timestamp,
            position_as_of_timestamp: position,
            is_playing: true,
            is_paused,
            is_system_initiated: false,
            playback_speed: 1.0,
            playback_id: "pb".to_string(),
            track: PlayerTrack::default(),
            next_tracks: vec![],
            prev_tracks: vec![],
            options: PlayerOptions::default(),
            index: PlayerIndex::default(),
            duration: 200_000,
            context_uri: String::new(),
            context_metadata: Default::default(),
            playback_quality: PlaybackQuality::default(),
            queue_revision: String::new(),
        }
    }

    #[test]
    fn test_paused_position_is_frozen() {
        let paused = state(true, 5000, 1_000);
        assert_eq!(position_ms(&paused, &FixedClock(1_000)), 5000);
        assert_eq!(position_ms(&paused, &FixedClock(999_999)), 5000);
    }

    #[test]
    fn test_playing_position_extrapolates() {
        let playing = state(false, 1000, 10_000);
        assert_eq!(position_ms(&playing, &FixedClock(12_500)), 3500);
        assert!((position_secs(&playing, &FixedClock(12_500)) - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_position_may_exceed_duration() {
        let playing = state(false, 199_000, 0);
        assert_eq!(position_ms(&playing, &FixedClock(5_000)), 204_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }
}
