use std::sync::Arc;

use anyhow::Context;
use beatsync_core::{
    Cache, MemoryCache, PlaybackEvent, PlaybackSync, PlaybackSyncOptions, RedisCache, TokenSource,
};
use beatsync_spotify_client::{AnalysisResult, SpotifyClient, Track};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod connection;

use config::Config;
use connection::Listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beatsync_listener=debug,beatsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    info!(device_id = %config.device_id, "Starting beatsync listener");

    let client = Arc::new(
        SpotifyClient::new(config.spotify()).context("Failed to build Spotify client")?,
    );
    let token = client
        .get_access_token()
        .await
        .context("Failed to mint access token")?;
    let tokens = Arc::new(TokenSource::new(token.access_token, client.clone()));

    let (analysis_cache, track_cache) = caches(&config).await;
    let options = PlaybackSyncOptions {
        sync: config.sync().clone(),
        analysis_cache: Some(analysis_cache),
        track_cache: Some(track_cache),
        resolve_tracks: config.resolve_tracks,
        ..Default::default()
    };
    let sync = Arc::new(PlaybackSync::new(client.clone(), tokens.clone(), options));
    tokio::spawn(log_events(sync.subscribe()));

    let listener = Listener::new(config, client, tokens, sync);
    tokio::select! {
        _ = listener.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

type Caches = (Arc<dyn Cache<AnalysisResult>>, Arc<dyn Cache<Track>>);

/// Redis caches when configured and reachable, in-memory ones otherwise
async fn caches(config: &Config) -> Caches {
    if let Some(redis) = config.redis() {
        let connected = async {
            let analyses = RedisCache::<AnalysisResult>::connect(redis, "analysis").await?;
            let tracks = RedisCache::<Track>::connect(redis, "track").await?;
            Ok::<_, beatsync_core::CacheError>((analyses, tracks))
        }
        .await;

        match connected {
            Ok((analyses, tracks)) => {
                info!("Using Redis resolver cache");
                return (Arc::new(analyses), Arc::new(tracks));
            }
            Err(e) => warn!(error = %e, "Redis unavailable, falling back to in-memory cache"),
        }
    }

    debug!("Using in-memory resolver cache");
    (
        Arc::new(MemoryCache::<AnalysisResult>::new()),
        Arc::new(MemoryCache::<Track>::new()),
    )
}

async fn log_events(mut events: broadcast::Receiver<PlaybackEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::Track(state) => info!(
            session_id = %state.session_id,
            track = %state.track.uri,
            "Track changed"
        ),
        PlaybackEvent::TrackResolved { track, .. } => {
            let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
            info!(
                name = %track.name,
                artists = %artists.join(", "),
                album = %track.album.name,
                "Now playing"
            );
        }
        PlaybackEvent::Paused(state)
        | PlaybackEvent::Resumed(state)
        | PlaybackEvent::Started(state)
        | PlaybackEvent::Stopped(state)
        | PlaybackEvent::Position(state)
        | PlaybackEvent::Duration(state)
        | PlaybackEvent::Options(state) => info!(
            event = event.name(),
            session_id = %state.session_id,
            position_ms = state.position_as_of_timestamp,
            duration_ms = state.duration,
            "Playback"
        ),
        PlaybackEvent::Device { device_id, device } => info!(
            device_id = %device_id,
            name = device.as_ref().map_or("unknown", |d| d.name.as_str()),
            "Active device changed"
        ),
        PlaybackEvent::Volume { device_id, volume } => {
            debug!(device_id = %device_id, volume, "Volume changed")
        }
        PlaybackEvent::Change(analysis) => info!(
            bars = analysis.bars.len(),
            beats = analysis.beats.len(),
            sections = analysis.sections.len(),
            tempo = analysis.track.tempo,
            "Analysis attached"
        ),
        PlaybackEvent::Section(section) => debug!(
            start = section.interval.start,
            tempo = section.tempo,
            loudness = section.loudness,
            "Section"
        ),
        PlaybackEvent::Bar(bar) => debug!(start = bar.start, "Bar"),
        PlaybackEvent::Beat(beat) => debug!(start = beat.start, "Beat"),
        PlaybackEvent::Tatum(tatum) => trace!(start = tatum.start, "Tatum"),
        PlaybackEvent::Segment(segment) => trace!(
            start = segment.current.interval.start,
            loudness_max = segment.current.loudness_max,
            "Segment"
        ),
        PlaybackEvent::Close => info!("Dealer connection closed"),
    }
}
