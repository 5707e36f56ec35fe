//! Spotify Web API response models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A span of a track, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    /// Start offset from the beginning of the track
    pub start: f64,
    /// Length of the interval
    pub duration: f64,
    /// Confidence of the detection (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f64,
}

impl TimeInterval {
    pub fn new(start: f64, duration: f64) -> Self {
        Self {
            start,
            duration,
            confidence: 1.0,
        }
    }

    /// Offset at which the interval ends
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether start and duration are usable for scheduling
    pub fn is_well_formed(&self) -> bool {
        self.start.is_finite() && self.duration.is_finite() && self.duration >= 0.0
    }
}

/// Anything anchored on a [`TimeInterval`]
pub trait Interval {
    fn interval(&self) -> &TimeInterval;
}

impl Interval for TimeInterval {
    fn interval(&self) -> &TimeInterval {
        self
    }
}

/// A large variation in rhythm or timbre (chorus, verse, bridge...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(flatten)]
    pub interval: TimeInterval,
    #[serde(default)]
    pub loudness: f64,
    #[serde(default)]
    pub tempo: f64,
    #[serde(default)]
    pub tempo_confidence: f64,
    #[serde(default)]
    pub key: i32,
    #[serde(default)]
    pub key_confidence: f64,
    #[serde(default)]
    pub mode: i32,
    #[serde(default)]
    pub mode_confidence: f64,
    #[serde(default)]
    pub time_signature: i32,
    #[serde(default)]
    pub time_signature_confidence: f64,
}

impl Interval for Section {
    fn interval(&self) -> &TimeInterval {
        &self.interval
    }
}

/// A short sound entity, roughly consistent in timbre and harmony
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(flatten)]
    pub interval: TimeInterval,
    #[serde(default)]
    pub loudness_start: f64,
    #[serde(default)]
    pub loudness_max_time: f64,
    #[serde(default)]
    pub loudness_max: f64,
    #[serde(default)]
    pub loudness_end: f64,
    #[serde(default)]
    pub pitches: Vec<f64>,
    #[serde(default)]
    pub timbre: Vec<f64>,
}

impl Interval for Segment {
    fn interval(&self) -> &TimeInterval {
        &self.interval
    }
}

/// Track-wide values of an audio analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisTrack {
    pub duration: f64,
    pub sample_md5: String,
    pub offset_seconds: f64,
    pub window_seconds: f64,
    pub analysis_sample_rate: f64,
    pub analysis_channels: u32,
    pub end_of_fade_in: f64,
    pub start_of_fade_out: f64,
    pub loudness: f64,
    pub tempo: f64,
    pub tempo_confidence: f64,
    pub time_signature: i32,
    pub time_signature_confidence: f64,
    pub key: i32,
    pub key_confidence: f64,
    pub mode: i32,
    pub mode_confidence: f64,
}

/// Full audio analysis of one track
///
/// Every interval list is sorted ascending by `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub bars: Vec<TimeInterval>,
    #[serde(default)]
    pub beats: Vec<TimeInterval>,
    #[serde(default)]
    pub tatums: Vec<TimeInterval>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub track: AnalysisTrack,
}

/// Album reference embedded in a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub release_date: Option<String>,
}

/// Cover art
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Artist reference embedded in a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub uri: String,
}

/// Full track metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub popularity: Option<u32>,
    pub album: Album,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub external_urls: BTreeMap<String, String>,
}

/// Access token minted from an open.spotify.com session
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    pub access_token_expiration_timestamp_ms: i64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "access_token_expiration_timestamp_ms",
                &self.access_token_expiration_timestamp_ms,
            )
            .field("client_id", &self.client_id)
            .field("is_anonymous", &self.is_anonymous)
            .finish()
    }
}

/// Dealer and spclient hosts offered by discovery, as `host:port`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealerDiscovery {
    pub dealer: Vec<String>,
    #[serde(default)]
    pub spclient: Vec<String>,
}

impl DealerDiscovery {
    /// WebSocket URL for the first dealer; port 443 selects `wss`
    pub fn websocket_url(&self, access_token: &str) -> Option<String> {
        let dealer = self.dealer.first()?;
        let (host, port) = dealer.split_once(':').unwrap_or((dealer.as_str(), "443"));
        let scheme = if port == "443" { "wss" } else { "ws" };
        Some(format!("{}://{}/?access_token={}", scheme, host, access_token))
    }
}

// Internal response types for deserialization

#[derive(Debug, Deserialize)]
pub(crate) struct TracksResponse {
    /// Unknown ids come back as `null`
    pub tracks: Vec<Option<Track>>,
}

/// Web API error envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    #[allow(dead_code)] // Required for serde deserialization, status comes from the response
    pub status: u16,
    #[serde(default)]
    pub message: String,
}
