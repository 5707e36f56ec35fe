//! JSON fixtures for dealer frames, connect-state clusters and Web API bodies
//!
//! Fixtures build `serde_json::Value`s in the exact wire shape so they can
//! be fed to the dealer socket as text or served by [`MockSpotifyServer`].
//!
//! [`MockSpotifyServer`]: crate::MockSpotifyServer

use serde_json::{json, Value};

/// Default connect-state timestamp used by fixtures (Unix ms)
pub const FIXTURE_TIMESTAMP_MS: i64 = 1_700_000_000_000;

/// Builder for a full connect-state player state
///
/// # Example
///
/// ```rust
/// use beatsync_test_utils::fixtures::PlayerStateFixture;
///
/// let state = PlayerStateFixture::new("S1")
///     .track("spotify:track:abc")
///     .paused(true)
///     .to_json();
/// assert_eq!(state["position_as_of_timestamp"], "0");
/// ```
#[derive(Debug, Clone)]
pub struct PlayerStateFixture {
    pub session_id: String,
    pub track_uri: String,
    pub is_playing: bool,
    pub is_paused: bool,
    pub position_ms: i64,
    pub timestamp_ms: i64,
    pub duration_ms: i64,
    pub next_tracks: Vec<String>,
    pub shuffling: bool,
    pub repeating_track: bool,
    pub playback_id: String,
}

impl PlayerStateFixture {
    /// A playing, unpaused state at position zero
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            track_uri: "spotify:track:4uLU6hMCjMI75M1A2tKUQC".to_string(),
            is_playing: true,
            is_paused: false,
            position_ms: 0,
            timestamp_ms: FIXTURE_TIMESTAMP_MS,
            duration_ms: 210_000,
            next_tracks: Vec::new(),
            shuffling: false,
            repeating_track: false,
            playback_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn track(mut self, uri: &str) -> Self {
        self.track_uri = uri.to_string();
        self
    }

    pub fn playing(mut self, is_playing: bool) -> Self {
        self.is_playing = is_playing;
        self
    }

    pub fn paused(mut self, is_paused: bool) -> Self {
        self.is_paused = is_paused;
        self
    }

    pub fn position(mut self, position_ms: i64) -> Self {
        self.position_ms = position_ms;
        self
    }

    pub fn timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Upcoming queue, as URIs (delimiters included verbatim)
    pub fn next_tracks(mut self, uris: &[&str]) -> Self {
        self.next_tracks = uris.iter().map(|uri| uri.to_string()).collect();
        self
    }

    pub fn shuffling(mut self, shuffling: bool) -> Self {
        self.shuffling = shuffling;
        self
    }

    pub fn repeating_track(mut self, repeating_track: bool) -> Self {
        self.repeating_track = repeating_track;
        self
    }

    /// Convert to JSON value; numeric fields are strings as on the wire
    pub fn to_json(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "timestamp": self.timestamp_ms.to_string(),
            "position_as_of_timestamp": self.position_ms.to_string(),
            "is_playing": self.is_playing,
            "is_paused": self.is_paused,
            "is_system_initiated": false,
            "playback_speed": 1.0,
            "playback_id": self.playback_id,
            "track": {
                "uri": self.track_uri,
                "uid": "q0",
                "provider": "context",
                "metadata": {}
            },
            "next_tracks": self.next_tracks.iter().map(|uri| json!({
                "uri": uri,
                "uid": "",
                "provider": "context",
                "metadata": {}
            })).collect::<Vec<_>>(),
            "prev_tracks": [],
            "options": {
                "shuffling_context": self.shuffling,
                "repeating_context": false,
                "repeating_track": self.repeating_track
            },
            "index": { "page": 0, "track": 0 },
            "duration": self.duration_ms.to_string(),
            "context_uri": "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M",
            "context_metadata": {},
            "playback_quality": { "bitrate_level": "HIGH" },
            "queue_revision": "1"
        })
    }
}

/// A cluster whose only device is the active one
pub fn cluster_json(active_device_id: &str, player_state: Value) -> Value {
    json!({
        "active_device_id": active_device_id,
        "devices": {
            active_device_id: {
                "device_id": active_device_id,
                "name": "Test Device",
                "device_type": "COMPUTER",
                "can_play": true,
                "volume": 65535
            }
        },
        "player_state": player_state,
        "timestamp": FIXTURE_TIMESTAMP_MS.to_string(),
        "server_timestamp_ms": FIXTURE_TIMESTAMP_MS.to_string(),
        "need_full_player_state": false
    })
}

/// One `DEVICE_STATE_CHANGED` payload entry wrapping [`cluster_json`]
pub fn cluster_update(active_device_id: &str, player_state: Value) -> Value {
    json!({
        "ack_id": "ack",
        "cluster": cluster_json(active_device_id, player_state),
        "devices_that_changed": [active_device_id],
        "update_reason": "DEVICE_STATE_CHANGED"
    })
}

/// A dealer `message` frame on `hm://connect-state/v1/cluster`
pub fn cluster_frame(updates: Vec<Value>) -> Value {
    json!({
        "type": "message",
        "uri": "hm://connect-state/v1/cluster",
        "headers": { "content-type": "application/json" },
        "payloads": updates
    })
}

/// The pusher frame announcing a dealer connection id
pub fn connection_frame(connection_id: &str) -> Value {
    json!({
        "type": "message",
        "method": "PUT",
        "uri": format!("hm://pusher/v1/connections/{}", connection_id),
        "headers": { "Spotify-Connection-Id": connection_id },
        "payloads": []
    })
}

/// A Web API track object
pub fn track_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "uri": format!("spotify:track:{}", id),
        "duration_ms": 210_000,
        "explicit": false,
        "popularity": 50,
        "album": {
            "id": format!("album-{}", id),
            "name": format!("{} (Album)", name),
            "uri": format!("spotify:album:album-{}", id),
            "images": [{ "url": "https://i.scdn.co/image/test", "width": 640, "height": 640 }],
            "release_date": "2020-01-01"
        },
        "artists": [{ "id": "artist-1", "name": "Test Artist", "uri": "spotify:artist:artist-1" }],
        "external_urls": { "spotify": format!("https://open.spotify.com/track/{}", id) }
    })
}

/// Builder for an audio analysis body
///
/// Every category is a list of `(start, duration)` pairs in seconds.
#[derive(Debug, Clone, Default)]
pub struct AnalysisFixture {
    pub bars: Vec<(f64, f64)>,
    pub beats: Vec<(f64, f64)>,
    pub tatums: Vec<(f64, f64)>,
    pub sections: Vec<(f64, f64)>,
    pub segments: Vec<(f64, f64)>,
    pub duration: f64,
}

/// `count` back-to-back intervals of `step` seconds starting at zero
pub fn grid(step: f64, count: usize) -> Vec<(f64, f64)> {
    (0..count).map(|i| (i as f64 * step, step)).collect()
}

impl AnalysisFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A steady 4/4 track: tatums at half beats, bars of four beats,
    /// segments on beats and sections of eight bars
    pub fn steady(duration: f64, beat: f64) -> Self {
        let beats = (duration / beat).floor() as usize;
        Self {
            bars: grid(beat * 4.0, beats / 4),
            beats: grid(beat, beats),
            tatums: grid(beat / 2.0, beats * 2),
            sections: grid(beat * 32.0, (beats / 32).max(1)),
            segments: grid(beat, beats),
            duration,
        }
    }

    pub fn bars(mut self, bars: Vec<(f64, f64)>) -> Self {
        self.bars = bars;
        self
    }

    pub fn beats(mut self, beats: Vec<(f64, f64)>) -> Self {
        self.beats = beats;
        self
    }

    pub fn tatums(mut self, tatums: Vec<(f64, f64)>) -> Self {
        self.tatums = tatums;
        self
    }

    pub fn sections(mut self, sections: Vec<(f64, f64)>) -> Self {
        self.sections = sections;
        self
    }

    pub fn segments(mut self, segments: Vec<(f64, f64)>) -> Self {
        self.segments = segments;
        self
    }

    pub fn to_json(&self) -> Value {
        let intervals = |items: &[(f64, f64)]| {
            items
                .iter()
                .map(|(start, duration)| {
                    json!({ "start": start, "duration": duration, "confidence": 0.9 })
                })
                .collect::<Vec<_>>()
        };
        let sections = self
            .sections
            .iter()
            .map(|(start, duration)| {
                json!({
                    "start": start,
                    "duration": duration,
                    "confidence": 1.0,
                    "loudness": -8.0,
                    "tempo": 120.0,
                    "key": 5,
                    "mode": 1,
                    "time_signature": 4
                })
            })
            .collect::<Vec<_>>();
        let segments = self
            .segments
            .iter()
            .map(|(start, duration)| {
                json!({
                    "start": start,
                    "duration": duration,
                    "confidence": 0.8,
                    "loudness_start": -20.0,
                    "loudness_max_time": 0.05,
                    "loudness_max": -6.0,
                    "loudness_end": 0.0,
                    "pitches": vec![0.5; 12],
                    "timbre": vec![1.0; 12]
                })
            })
            .collect::<Vec<_>>();

        json!({
            "bars": intervals(&self.bars),
            "beats": intervals(&self.beats),
            "tatums": intervals(&self.tatums),
            "sections": sections,
            "segments": segments,
            "track": {
                "duration": self.duration,
                "tempo": 120.0,
                "time_signature": 4,
                "key": 5,
                "mode": 1
            }
        })
    }
}
