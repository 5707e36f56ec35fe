//! Track metadata and audio analysis resolution
//!
//! Both resolvers react to player state changes, consult their cache,
//! fetch what is missing from the Web API and hand results back through a
//! callback. An expired access token is regenerated once per operation.
//! Results are dropped if a newer resolution started in the meantime.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use beatsync_shared_config::MAX_LOOKAHEAD_TRACKS;
use beatsync_spotify_client::{AnalysisResult, SpotifyClient, SpotifyError, Track};
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::ResolveError;
use crate::model::PlayerState;
use crate::observer::{Observer, PlayerStateObserver, StateChange};
use crate::socket::DealerSocket;

// =============================================================================
// External APIs
// =============================================================================

/// Bulk track metadata lookup
#[async_trait]
pub trait TrackApi: Send + Sync {
    /// Ids unknown to the API are absent from the result
    async fn resolve_tracks(
        &self,
        ids: &[String],
        access_token: &str,
    ) -> Result<HashMap<String, Track>, SpotifyError>;
}

/// Per-track audio analysis lookup
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn analyze_track(
        &self,
        id: &str,
        access_token: &str,
    ) -> Result<AnalysisResult, SpotifyError>;
}

/// Mints a replacement access token
#[async_trait]
pub trait TokenRegenerator: Send + Sync {
    async fn regenerate(&self) -> Result<String, SpotifyError>;
}

#[async_trait]
impl TrackApi for SpotifyClient {
    async fn resolve_tracks(
        &self,
        ids: &[String],
        access_token: &str,
    ) -> Result<HashMap<String, Track>, SpotifyError> {
        self.get_tracks(ids, access_token).await
    }
}

#[async_trait]
impl AnalysisApi for SpotifyClient {
    async fn analyze_track(
        &self,
        id: &str,
        access_token: &str,
    ) -> Result<AnalysisResult, SpotifyError> {
        self.get_audio_analysis(id, access_token).await
    }
}

#[async_trait]
impl TokenRegenerator for SpotifyClient {
    async fn regenerate(&self) -> Result<String, SpotifyError> {
        Ok(self.get_access_token().await?.access_token)
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// The access token currently in use, shared by every resolver
pub struct TokenSource {
    current: RwLock<String>,
    regenerator: Arc<dyn TokenRegenerator>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("current", &"[REDACTED]")
            .finish()
    }
}

impl TokenSource {
    pub fn new(initial: impl Into<String>, regenerator: Arc<dyn TokenRegenerator>) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            regenerator,
        }
    }

    pub fn current(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Mint a new token and make it current
    pub async fn regenerate(&self) -> Result<String, ResolveError> {
        let token = self
            .regenerator
            .regenerate()
            .await
            .map_err(ResolveError::TokenRegeneration)?;
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = token.clone();
        debug!("Regenerated access token");
        Ok(token)
    }
}

/// Run an API call with the current token, regenerating and retrying once on expiry
pub async fn with_token<T, F, Fut>(tokens: &TokenSource, operation: F) -> Result<T, ResolveError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SpotifyError>>,
{
    match operation(tokens.current()).await {
        Err(e) if e.is_token_expired() => {
            debug!(error = %e, "Access token expired, regenerating");
            let token = tokens.regenerate().await?;
            Ok(operation(token).await?)
        }
        result => Ok(result?),
    }
}

// =============================================================================
// Cache-through lookup
// =============================================================================

/// Serve `ids` from the cache, fetching the misses once
///
/// Fetched values are stored before returning. A failing cache lookup
/// counts as a miss and a failing store is only logged, so the cache never
/// fails a resolution.
pub async fn try_cached<T, F, Fut>(
    ids: &[String],
    cache: Option<&dyn Cache<T>>,
    fetch: F,
) -> Result<HashMap<String, T>, ResolveError>
where
    T: Send,
    F: FnOnce(Vec<String>) -> Fut,
    Fut: Future<Output = Result<HashMap<String, T>, ResolveError>>,
{
    let mut found = match cache {
        Some(cache) => cache.resolve(ids).await.unwrap_or_else(|e| {
            warn!(error = %e, "Cache lookup failed, treating as miss");
            HashMap::new()
        }),
        None => HashMap::new(),
    };

    let mut seen = HashSet::new();
    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.contains_key(*id) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    debug!(hits = found.len(), misses = missing.len(), "Consulted cache");
    if missing.is_empty() {
        return Ok(found);
    }

    let fetched = fetch(missing).await?;

    if let Some(cache) = cache {
        if !fetched.is_empty() {
            if let Err(e) = cache.store(&fetched).await {
                warn!(error = %e, "Failed to store resolved entries");
            }
        }
    }

    found.extend(fetched);
    Ok(found)
}

fn track_ids<'a>(states: impl IntoIterator<Item = &'a Arc<PlayerState>>) -> Vec<String> {
    let mut seen = HashSet::new();
    states
        .into_iter()
        .filter_map(|state| state.track_id())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Track resolver
// =============================================================================

/// A player state with the full metadata of its current track
#[derive(Debug, Clone)]
pub struct TrackResolution {
    pub state: Arc<PlayerState>,
    pub track: Arc<Track>,
}

struct TrackResolverInner {
    api: Arc<dyn TrackApi>,
    tokens: Arc<TokenSource>,
    cache: Option<Arc<dyn Cache<Track>>>,
    generation: AtomicU64,
}

impl TrackResolverInner {
    async fn fetch(&self, ids: Vec<String>) -> Result<HashMap<String, Track>, ResolveError> {
        let ids = &ids;
        with_token(&self.tokens, |token| async move {
            self.api.resolve_tracks(ids, &token).await
        })
        .await
    }

    async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, Track>, ResolveError> {
        try_cached(ids, self.cache.as_deref(), |missing| self.fetch(missing)).await
    }
}

/// Resolves full track metadata whenever a session's track changes
pub struct PlayerTrackResolver {
    observer: PlayerStateObserver,
}

impl PlayerTrackResolver {
    pub fn new<F>(
        api: Arc<dyn TrackApi>,
        tokens: Arc<TokenSource>,
        cache: Option<Arc<dyn Cache<Track>>>,
        callback: F,
    ) -> Self
    where
        F: Fn(Vec<TrackResolution>) + Send + Sync + 'static,
    {
        let inner = Arc::new(TrackResolverInner {
            api,
            tokens,
            cache,
            generation: AtomicU64::new(0),
        });
        let callback = Arc::new(callback);

        let observer = PlayerStateObserver::new(move |changes: Vec<StateChange>| {
            let states: Vec<Arc<PlayerState>> = changes
                .into_iter()
                .filter(|change| change.diff.track.uri.is_different())
                .map(|change| change.state)
                .collect();
            if states.is_empty() {
                return;
            }

            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let inner = inner.clone();
            let callback = callback.clone();

            tokio::spawn(async move {
                let ids = track_ids(&states);
                let tracks = match inner.resolve(&ids).await {
                    Ok(tracks) => tracks,
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve tracks");
                        return;
                    }
                };

                if inner.generation.load(Ordering::SeqCst) != generation {
                    debug!(generation, "Discarding stale track resolution");
                    return;
                }

                let resolved: Vec<TrackResolution> = states
                    .into_iter()
                    .filter_map(|state| {
                        let track = tracks.get(state.track_id()?)?.clone();
                        Some(TrackResolution {
                            state,
                            track: Arc::new(track),
                        })
                    })
                    .collect();

                if !resolved.is_empty() {
                    callback(resolved);
                }
            });
        });

        Self { observer }
    }
}

impl Observer for PlayerTrackResolver {
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
// Audio analysis resolver
// =============================================================================

/// An analysis paired with the state it was resolved for
#[derive(Debug, Clone)]
pub struct AnalysisUpdate {
    pub analysis: Arc<AnalysisResult>,
    pub state: Arc<PlayerState>,
}

struct AnalysisResolverInner {
    api: Arc<dyn AnalysisApi>,
    tokens: Arc<TokenSource>,
    cache: Option<Arc<dyn Cache<AnalysisResult>>>,
    lookahead: usize,
    generation: AtomicU64,
}

impl AnalysisResolverInner {
    /// Analyses are requested one id at a time; ids without one are skipped
    async fn fetch(&self, ids: Vec<String>) -> Result<HashMap<String, AnalysisResult>, ResolveError> {
        let mut analyses = HashMap::with_capacity(ids.len());
        for id in &ids {
            let id = id.as_str();
            let result = with_token(&self.tokens, |token| async move {
                self.api.analyze_track(id, &token).await
            })
            .await;

            match result {
                Ok(analysis) => {
                    analyses.insert(id.to_string(), analysis);
                }
                Err(ResolveError::Api(SpotifyError::NotFound(_))) => {
                    debug!(track_id = %id, "Track has no audio analysis");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(analyses)
    }

    async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, AnalysisResult>, ResolveError> {
        try_cached(ids, self.cache.as_deref(), |missing| self.fetch(missing)).await
    }

    /// Warm the cache for upcoming tracks
    async fn prefetch(&self, states: &[Arc<PlayerState>], resolved: &HashMap<String, AnalysisResult>) {
        if self.cache.is_none() || self.lookahead == 0 {
            return;
        }

        let mut seen = HashSet::new();
        let upcoming: Vec<String> = states
            .iter()
            .flat_map(|state| state.upcoming_track_ids().take(self.lookahead))
            .filter(|id| !resolved.contains_key(*id) && seen.insert(*id))
            .take(self.lookahead)
            .map(str::to_string)
            .collect();
        if upcoming.is_empty() {
            return;
        }

        match self.resolve(&upcoming).await {
            Ok(found) => debug!(requested = upcoming.len(), found = found.len(), "Prefetched analyses"),
            Err(e) => debug!(error = %e, "Analysis prefetch failed"),
        }
    }
}

fn affects_analysis(change: &StateChange) -> bool {
    let diff = &change.diff;
    diff.track.uri.is_different()
        || diff.position_as_of_timestamp.is_different()
        || diff.is_playing.is_different()
        || diff.is_paused.is_different()
}

/// Resolves audio analyses for states whose timing changed
///
/// After a batch is delivered, the analyses of the next queued tracks are
/// fetched into the cache in the background, at most
/// [`MAX_LOOKAHEAD_TRACKS`] of them.
pub struct AudioAnalysisObserver {
    observer: PlayerStateObserver,
}

impl AudioAnalysisObserver {
    pub fn new<F>(
        api: Arc<dyn AnalysisApi>,
        tokens: Arc<TokenSource>,
        cache: Option<Arc<dyn Cache<AnalysisResult>>>,
        lookahead: usize,
        callback: F,
    ) -> Self
    where
        F: Fn(Vec<AnalysisUpdate>) + Send + Sync + 'static,
    {
        let inner = Arc::new(AnalysisResolverInner {
            api,
            tokens,
            cache,
            lookahead: lookahead.min(MAX_LOOKAHEAD_TRACKS),
            generation: AtomicU64::new(0),
        });
        let callback = Arc::new(callback);

        let observer = PlayerStateObserver::new(move |changes: Vec<StateChange>| {
            let states: Vec<Arc<PlayerState>> = changes
                .into_iter()
                .filter(affects_analysis)
                .map(|change| change.state)
                .collect();
            if states.is_empty() {
                return;
            }

            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let inner = inner.clone();
            let callback = callback.clone();

            tokio::spawn(async move {
                let ids = track_ids(&states);
                let analyses = match inner.resolve(&ids).await {
                    Ok(analyses) => analyses,
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve audio analyses");
                        return;
                    }
                };

                if inner.generation.load(Ordering::SeqCst) != generation {
                    debug!(generation, "Discarding stale analysis batch");
                    return;
                }

                let updates: Vec<AnalysisUpdate> = states
                    .iter()
                    .filter_map(|state| {
                        let analysis = analyses.get(state.track_id()?)?.clone();
                        Some(AnalysisUpdate {
                            analysis: Arc::new(analysis),
                            state: state.clone(),
                        })
                    })
                    .collect();

                if !updates.is_empty() {
                    callback(updates);
                }

                inner.prefetch(&states, &analyses).await;
            });
        });

        Self { observer }
    }
}

impl Observer for AudioAnalysisObserver {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::CacheError;
    use assert_matches::assert_matches;
    use beatsync_test_utils::fixtures::{
        cluster_frame, cluster_update, track_json, AnalysisFixture, PlayerStateFixture,
    };
    use beatsync_test_utils::MockCacheStore;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    struct RecordingCache(MockCacheStore<u32>);

    #[async_trait]
    impl Cache<u32> for RecordingCache {
        async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, u32>, CacheError> {
            let found = self.0.resolve(ids);
            if self.0.should_fail_resolve() {
                return Err(CacheError::Timeout);
            }
            Ok(found)
        }

        async fn store(&self, values: &HashMap<String, u32>) -> Result<(), CacheError> {
            if self.0.should_fail_store() {
                return Err(CacheError::Timeout);
            }
            self.0.store(values);
            Ok(())
        }
    }

    struct FixedRegenerator(Result<&'static str, ()>);

    #[async_trait]
    impl TokenRegenerator for FixedRegenerator {
        async fn regenerate(&self) -> Result<String, SpotifyError> {
            self.0
                .map(str::to_string)
                .map_err(|_| SpotifyError::MissingCookie)
        }
    }

    fn tokens(initial: &str, next: Result<&'static str, ()>) -> Arc<TokenSource> {
        Arc::new(TokenSource::new(initial, Arc::new(FixedRegenerator(next))))
    }

    fn expired() -> SpotifyError {
        SpotifyError::TokenExpired {
            status: 401,
            message: "The access token expired".to_string(),
        }
    }

    /// Tracks keyed by id; tokens listed in `expired` are rejected
    struct FakeTracks {
        tracks: HashMap<String, Track>,
        expired: Vec<&'static str>,
        calls: Mutex<Vec<(Vec<String>, String)>>,
    }

    impl FakeTracks {
        fn new(ids: &[&str], expired: Vec<&'static str>) -> Self {
            Self {
                tracks: ids
                    .iter()
                    .map(|id| {
                        let track: Track = serde_json::from_value(track_json(id, id)).unwrap();
                        (id.to_string(), track)
                    })
                    .collect(),
                expired,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TrackApi for FakeTracks {
        async fn resolve_tracks(
            &self,
            ids: &[String],
            access_token: &str,
        ) -> Result<HashMap<String, Track>, SpotifyError> {
            self.calls
                .lock()
                .unwrap()
                .push((ids.to_vec(), access_token.to_string()));
            if self.expired.contains(&access_token) {
                return Err(expired());
            }
            Ok(ids
                .iter()
                .filter_map(|id| self.tracks.get(id).map(|t| (id.clone(), t.clone())))
                .collect())
        }
    }

    /// Analyses for every id; ids in `gated` wait for `release`
    struct FakeAnalyses {
        gated: Vec<&'static str>,
        release: Arc<Notify>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnalysisApi for FakeAnalyses {
        async fn analyze_track(
            &self,
            id: &str,
            _access_token: &str,
        ) -> Result<AnalysisResult, SpotifyError> {
            self.calls.lock().unwrap().push(id.to_string());
            if self.gated.contains(&id) {
                self.release.notified().await;
            }
            if id == "missing" {
                return Err(SpotifyError::NotFound(id.to_string()));
            }
            Ok(serde_json::from_value(AnalysisFixture::steady(8.0, 0.5).to_json()).unwrap())
        }
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn send_states(socket: &DealerSocket, fixtures: Vec<PlayerStateFixture>) {
        let updates = fixtures
            .into_iter()
            .map(|f| cluster_update("d1", f.to_json()))
            .collect();
        socket.handle_text(&cluster_frame(updates).to_string()).unwrap();
    }

    // -------------------------------------------------------------------------
    // try_cached
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_try_cached_fetches_only_misses_and_stores_first() {
        let store = MockCacheStore::new();
        store.insert("A", 1);
        let cache = RecordingCache(store.clone());
        let fetched_with = Arc::new(Mutex::new(Vec::new()));
        let fetched_clone = fetched_with.clone();

        let result = try_cached(&ids(&["A", "B"]), Some(&cache as &dyn Cache<u32>), |missing| async move {
            fetched_clone.lock().unwrap().push(missing.clone());
            Ok(missing.into_iter().map(|id| (id, 2)).collect())
        })
        .await
        .unwrap();

        assert_eq!(*fetched_with.lock().unwrap(), vec![ids(&["B"])]);
        assert_eq!(store.store_calls(), vec![ids(&["B"])]);
        assert_eq!(result, HashMap::from([("A".to_string(), 1), ("B".to_string(), 2)]));
    }

    #[tokio::test]
    async fn test_try_cached_skips_fetch_on_full_hit() {
        let store = MockCacheStore::new();
        store.insert("A", 1);
        let cache = RecordingCache(store.clone());
        let fetched = Arc::new(Mutex::new(false));
        let fetched_clone = fetched.clone();

        let result = try_cached(&ids(&["A"]), Some(&cache as &dyn Cache<u32>), |_| async move {
            *fetched_clone.lock().unwrap() = true;
            Ok(HashMap::new())
        })
        .await
        .unwrap();

        assert_eq!(result.len(), 1);
        assert!(!*fetched.lock().unwrap());
        assert!(store.store_calls().is_empty());
    }

    #[tokio::test]
    async fn test_try_cached_survives_cache_failures() {
        let store = MockCacheStore::new();
        store.insert("A", 1);
        store.set_fail_resolve(true);
        store.set_fail_store(true);
        let cache = RecordingCache(store.clone());

        let result = try_cached(&ids(&["A", "A"]), Some(&cache as &dyn Cache<u32>), |missing| async move {
            assert_eq!(missing, vec!["A".to_string()]);
            Ok(HashMap::from([("A".to_string(), 7)]))
        })
        .await
        .unwrap();

        assert_eq!(result["A"], 7);
        assert!(store.store_calls().is_empty());
    }

    #[tokio::test]
    async fn test_try_cached_without_cache_always_fetches() {
        let result = try_cached::<u32, _, _>(&ids(&["A"]), None, |missing| async move {
            Ok(missing.into_iter().map(|id| (id, 3)).collect())
        })
        .await
        .unwrap();
        assert_eq!(result["A"], 3);
    }

    // -------------------------------------------------------------------------
    // Token expiry
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_expired_token_is_regenerated_once() {
        let api = FakeTracks::new(&["a"], vec!["stale"]);
        let tokens = tokens("stale", Ok("fresh"));

        let tracks = with_token(&tokens, |token| {
            let api = &api;
            async move { api.resolve_tracks(&ids(&["a"]), &token).await }
        })
        .await
        .unwrap();

        assert!(tracks.contains_key("a"));
        assert_eq!(tokens.current(), "fresh");
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, "fresh");
    }

    #[tokio::test]
    async fn test_second_expiry_propagates() {
        let api = FakeTracks::new(&["a"], vec!["stale", "also-stale"]);
        let tokens = tokens("stale", Ok("also-stale"));

        let error = with_token(&tokens, |token| {
            let api = &api;
            async move { api.resolve_tracks(&ids(&["a"]), &token).await }
        })
        .await
        .unwrap_err();

        assert!(error.is_token_expired());
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_regeneration_failure_is_reported() {
        let api = FakeTracks::new(&["a"], vec!["stale"]);
        let tokens = tokens("stale", Err(()));

        let error = with_token(&tokens, |token| {
            let api = &api;
            async move { api.resolve_tracks(&ids(&["a"]), &token).await }
        })
        .await
        .unwrap_err();

        assert_matches!(error, ResolveError::TokenRegeneration(SpotifyError::MissingCookie));
        assert_eq!(tokens.current(), "stale");
    }

    // -------------------------------------------------------------------------
    // Resolvers
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_track_resolver_reacts_to_track_changes_only() {
        let (socket, _rx) = DealerSocket::new(Duration::from_secs(30));
        let api = Arc::new(FakeTracks::new(&["a", "b"], vec![]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = PlayerTrackResolver::new(
            api.clone(),
            tokens("token", Ok("token")),
            Some(Arc::new(MemoryCache::<Track>::new())),
            move |resolved| {
                let _ = tx.send(resolved);
            },
        );
        resolver.observe(&socket);

        let first = PlayerStateFixture::new("S1").track("spotify:track:a");
        send_states(&socket, vec![first.clone()]);
        let resolved = rx.recv().await.unwrap();
        assert_eq!(resolved[0].track.id, "a");

        send_states(&socket, vec![first.clone().position(5000)]);
        send_states(&socket, vec![first.track("spotify:track:b")]);
        let resolved = rx.recv().await.unwrap();
        assert_eq!(resolved[0].track.id, "b");
        assert_eq!(api.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_analysis_batch_is_discarded() {
        let (socket, _rx) = DealerSocket::new(Duration::from_secs(30));
        let release = Arc::new(Notify::new());
        let api = Arc::new(FakeAnalyses {
            gated: vec!["slow"],
            release: release.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = AudioAnalysisObserver::new(
            api.clone(),
            tokens("token", Ok("token")),
            None,
            5,
            move |updates| {
                let _ = tx.send(updates);
            },
        );
        observer.observe(&socket);

        send_states(&socket, vec![PlayerStateFixture::new("S1").track("spotify:track:slow")]);
        tokio::task::yield_now().await;
        send_states(&socket, vec![PlayerStateFixture::new("S1").track("spotify:track:fast")]);

        let updates = rx.recv().await.unwrap();
        assert_eq!(updates[0].state.track_id(), Some("fast"));

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_analysis_lookahead_is_capped() {
        let (socket, _rx) = DealerSocket::new(Duration::from_secs(30));
        let api = Arc::new(FakeAnalyses {
            gated: vec![],
            release: Arc::new(Notify::new()),
            calls: Mutex::new(Vec::new()),
        });
        let cache: Arc<MemoryCache<AnalysisResult>> = Arc::new(MemoryCache::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = AudioAnalysisObserver::new(
            api.clone(),
            tokens("token", Ok("token")),
            Some(cache.clone()),
            20,
            move |updates| {
                let _ = tx.send(updates);
            },
        );
        observer.observe(&socket);

        let queued: Vec<String> = (1..=8).map(|n| format!("spotify:track:q{}", n)).collect();
        let queued: Vec<&str> = queued.iter().map(String::as_str).collect();
        let state = PlayerStateFixture::new("S1")
            .track("spotify:track:now")
            .next_tracks(&queued);
        send_states(&socket, vec![state]);

        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 1 + MAX_LOOKAHEAD_TRACKS);
        assert_eq!(calls.last().map(String::as_str), Some("q5"));
    }

    #[tokio::test]
    async fn test_analysis_lookahead_warms_cache() {
        let (socket, _rx) = DealerSocket::new(Duration::from_secs(30));
        let api = Arc::new(FakeAnalyses {
            gated: vec![],
            release: Arc::new(Notify::new()),
            calls: Mutex::new(Vec::new()),
        });
        let cache: Arc<MemoryCache<AnalysisResult>> = Arc::new(MemoryCache::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = AudioAnalysisObserver::new(
            api.clone(),
            tokens("token", Ok("token")),
            Some(cache.clone()),
            2,
            move |updates| {
                let _ = tx.send(updates);
            },
        );
        observer.observe(&socket);

        let state = PlayerStateFixture::new("S1").track("spotify:track:now").next_tracks(&[
            "spotify:delimiter",
            "spotify:track:n1",
            "spotify:track:missing",
            "spotify:track:n3",
        ]);
        send_states(&socket, vec![state]);

        let updates = rx.recv().await.unwrap();
        assert_eq!(updates.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec!["now".to_string(), "n1".to_string(), "missing".to_string()]
        );
        let cached = cache.resolve(&ids(&["now", "n1", "n3"])).await.unwrap();
        assert!(cached.contains_key("now"));
        assert!(cached.contains_key("n1"));
        assert!(!cached.contains_key("n3"));
    }
}
