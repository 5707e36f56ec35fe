//! Connect-state wire model
//!
//! Clusters arrive wholesale from the dealer on every update. The player
//! state inside may be a fragment (e.g. nothing left in the queue), so it
//! is kept as raw JSON on the cluster and only promoted to a
//! [`PlayerState`] once the mandatory keys are present.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff_record;

/// Keys without which a player state is treated as a partial fragment
pub const MANDATORY_PLAYER_STATE_KEYS: [&str; 7] = [
    "context_metadata",
    "duration",
    "index",
    "playback_id",
    "playback_quality",
    "timestamp",
    "track",
];

/// Keys a dealer payload needs to be read as a cluster update
pub const CLUSTER_UPDATE_KEYS: [&str; 3] = ["cluster", "devices_that_changed", "update_reason"];

/// Update reason of regular device state pushes
pub const DEVICE_STATE_CHANGED: &str = "DEVICE_STATE_CHANGED";

/// Update reason of the synthetic update injected after registration
pub const INITIAL_STATE: &str = "INITIAL_STATE";

const TRACK_URI_PREFIX: &str = "spotify:track:";

/// Extract the track id from a `spotify:track:<id>` URI
pub fn track_id_from_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix(TRACK_URI_PREFIX).filter(|id| !id.is_empty())
}

// =============================================================================
// Cluster
// =============================================================================

/// One `hm://connect-state/v1/cluster` payload entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterUpdate {
    #[serde(default)]
    pub ack_id: String,
    pub cluster: Cluster,
    pub devices_that_changed: Vec<String>,
    pub update_reason: String,
}

/// Snapshot of every known device plus the active player state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default)]
    pub active_device_id: String,
    #[serde(default)]
    pub devices: BTreeMap<String, ClusterDevice>,
    #[serde(default)]
    pub player_state: serde_json::Value,
    #[serde(default, with = "numeric_string")]
    pub timestamp: i64,
    #[serde(default, with = "numeric_string")]
    pub server_timestamp_ms: i64,
    #[serde(default)]
    pub need_full_player_state: bool,
}

impl Cluster {
    /// The active device entry, if it is known
    pub fn active_device(&self) -> Option<&ClusterDevice> {
        self.devices.get(&self.active_device_id)
    }

    /// Whether the embedded player state carries every mandatory key
    pub fn has_full_player_state(&self) -> bool {
        self.player_state
            .as_object()
            .map_or(false, |state| {
                MANDATORY_PLAYER_STATE_KEYS
                    .iter()
                    .all(|key| state.contains_key(*key))
            })
    }

    /// Promote the embedded player state, rejecting fragments
    pub fn player_state(&self) -> Option<Result<PlayerState, serde_json::Error>> {
        if !self.has_full_player_state() {
            return None;
        }
        Some(PlayerState::deserialize(&self.player_state))
    }
}

/// A device participating in the cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDevice {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub client_id: String,
    pub can_play: bool,
    pub volume: u32,
    pub device_software_version: String,
    pub spirc_version: String,
    pub metadata_map: BTreeMap<String, String>,
}

// =============================================================================
// Player state
// =============================================================================

/// Full player state of one playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub session_id: String,
    #[serde(with = "numeric_string")]
    pub timestamp: i64,
    #[serde(default, with = "numeric_string")]
    pub position_as_of_timestamp: i64,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub is_system_initiated: bool,
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,
    pub playback_id: String,
    pub track: PlayerTrack,
    #[serde(default)]
    pub next_tracks: Vec<PlayerTrack>,
    #[serde(default)]
    pub prev_tracks: Vec<PlayerTrack>,
    #[serde(default)]
    pub options: PlayerOptions,
    pub index: PlayerIndex,
    #[serde(with = "numeric_string")]
    pub duration: i64,
    #[serde(default)]
    pub context_uri: String,
    pub context_metadata: BTreeMap<String, String>,
    pub playback_quality: PlaybackQuality,
    #[serde(default)]
    pub queue_revision: String,
}

fn default_playback_speed() -> f64 {
    1.0
}

impl PlayerState {
    /// Playing and not paused
    pub fn is_active(&self) -> bool {
        self.is_playing && !self.is_paused
    }

    /// Id of the current track, `None` for episodes and local files
    pub fn track_id(&self) -> Option<&str> {
        track_id_from_uri(&self.track.uri)
    }

    /// Ids of upcoming queued tracks, skipping delimiters
    pub fn upcoming_track_ids(&self) -> impl Iterator<Item = &str> {
        self.next_tracks
            .iter()
            .filter(|track| !track.uri.contains("delimiter"))
            .filter_map(|track| track_id_from_uri(&track.uri))
    }
}

/// Track reference inside a player state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerTrack {
    pub uri: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Shuffle and repeat flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    pub shuffling_context: bool,
    pub repeating_context: bool,
    pub repeating_track: bool,
}

/// Position of the current track within its context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerIndex {
    pub page: u32,
    pub track: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackQuality {
    pub bitrate_level: String,
}

diff_record! {
    /// Field-by-field diff of a [`PlayerState`]
    pub struct PlayerStateDiff for PlayerState {
        session_id: String,
        timestamp: i64,
        position_as_of_timestamp: i64,
        is_playing: bool,
        is_paused: bool,
        is_system_initiated: bool,
        playback_speed: f64,
        playback_id: String,
        track: PlayerTrack,
        next_tracks: Vec<PlayerTrack>,
        prev_tracks: Vec<PlayerTrack>,
        options: PlayerOptions,
        index: PlayerIndex,
        duration: i64,
        context_uri: String,
        context_metadata: BTreeMap<String, String>,
        playback_quality: PlaybackQuality,
        queue_revision: String,
    }
}

diff_record! {
    pub struct PlayerTrackDiff for PlayerTrack {
        uri: String,
        uid: String,
        provider: String,
        metadata: BTreeMap<String, String>,
    }
}

diff_record! {
    pub struct PlayerOptionsDiff for PlayerOptions {
        shuffling_context: bool,
        repeating_context: bool,
        repeating_track: bool,
    }
}

diff_record! {
    pub struct PlayerIndexDiff for PlayerIndex {
        page: u32,
        track: u32,
    }
}

diff_record! {
    pub struct PlaybackQualityDiff for PlaybackQuality {
        bitrate_level: String,
    }
}

/// Active device and its volume, as tracked across clusters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveDevice {
    pub device_id: String,
    pub volume: u32,
}

impl ActiveDevice {
    pub fn from_cluster(cluster: &Cluster) -> Self {
        Self {
            device_id: cluster.active_device_id.clone(),
            volume: cluster.active_device().map_or(0, |device| device.volume),
        }
    }
}

diff_record! {
    pub struct ActiveDeviceDiff for ActiveDevice {
        device_id: String,
        volume: u32,
    }
}

/// Decimal-string integers as sent by connect-state
///
/// Accepts strings or JSON numbers; always serializes back to a string.
pub(crate) mod numeric_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => Ok(value),
            Raw::Float(value) if value.is_finite() => Ok(value.round() as i64),
            Raw::Float(value) => Err(D::Error::custom(format!("non-finite number {}", value))),
            Raw::Text(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .or_else(|_| text.parse::<f64>().map(|v| v.round() as i64))
                    .map_err(|_| D::Error::custom(format!("invalid numeric string {:?}", text)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffNode, Diffable};
    use serde_json::json;

    fn player_state_json() -> serde_json::Value {
        json!({
            "session_id": "S1",
            "timestamp": "1700000000000",
            "position_as_of_timestamp": "5000",
            "is_playing": true,
            "is_paused": false,
            "playback_speed": 1.0,
            "playback_id": "pb1",
            "track": { "uri": "spotify:track:abc", "uid": "u1", "provider": "context", "metadata": {} },
            "next_tracks": [
                { "uri": "spotify:track:n1" },
                { "uri": "spotify:delimiter" },
                { "uri": "spotify:episode:e1" },
                { "uri": "spotify:track:n2" }
            ],
            "options": { "shuffling_context": false, "repeating_context": true, "repeating_track": false },
            "index": { "page": 0, "track": 3 },
            "duration": "215000",
            "context_metadata": {},
            "playback_quality": { "bitrate_level": "HIGH" }
        })
    }

    #[test]
    fn test_numeric_strings_parse() {
        let state: PlayerState = serde_json::from_value(player_state_json()).unwrap();
        assert_eq!(state.timestamp, 1_700_000_000_000);
        assert_eq!(state.position_as_of_timestamp, 5000);
        assert_eq!(state.duration, 215_000);
        assert_eq!(state.track_id(), Some("abc"));
        assert!(state.is_active());
    }

    #[test]
    fn test_numeric_strings_serialize_as_strings() {
        let state: PlayerState = serde_json::from_value(player_state_json()).unwrap();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["duration"], json!("215000"));
        assert_eq!(value["position_as_of_timestamp"], json!("5000"));
    }

    #[test]
    fn test_upcoming_ids_skip_delimiters_and_non_tracks() {
        let state: PlayerState = serde_json::from_value(player_state_json()).unwrap();
        let ids: Vec<&str> = state.upcoming_track_ids().collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn test_fragment_player_state_is_rejected() {
        let cluster: Cluster = serde_json::from_value(json!({
            "active_device_id": "d1",
            "player_state": { "session_id": "S1", "is_playing": false },
            "timestamp": "1"
        }))
        .unwrap();
        assert!(!cluster.has_full_player_state());
        assert!(cluster.player_state().is_none());
    }

    #[test]
    fn test_full_player_state_is_promoted() {
        let cluster: Cluster = serde_json::from_value(json!({
            "active_device_id": "d1",
            "devices": { "d1": { "device_id": "d1", "name": "Desk", "volume": 40000 } },
            "player_state": player_state_json()
        }))
        .unwrap();
        let state = cluster.player_state().unwrap().unwrap();
        assert_eq!(state.session_id, "S1");
        assert_eq!(ActiveDevice::from_cluster(&cluster).volume, 40000);
    }

    #[test]
    fn test_player_state_diff_tracks_uri_change() {
        let old: PlayerState = serde_json::from_value(player_state_json()).unwrap();
        let mut new = old.clone();
        new.track.uri = "spotify:track:def".to_string();

        let diff = PlayerState::diff(Some(&old), &new);
        assert!(diff.track.uri.is_different());
        assert!(!diff.is_paused.is_different());
        assert!(!diff.options.is_changed());
    }
}
