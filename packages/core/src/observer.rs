//! Cluster and player state observers
//!
//! [`ClusterObserver`] turns connect-state messages into clusters.
//! [`PlayerStateObserver`] diffs each cluster's player state against the
//! last snapshot of the same session held in its [`SessionStore`].
//! [`DeviceObserver`] follows the active device and its volume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::diff::Diffable;
use crate::error::HandlerError;
use crate::model::{
    ActiveDevice, Cluster, ClusterDevice, ClusterUpdate, PlayerState, PlayerStateDiff,
    CLUSTER_UPDATE_KEYS, DEVICE_STATE_CHANGED, INITIAL_STATE,
};
use crate::socket::{
    DealerSocket, MessageHandler, ParsedMessage, SharedHandler, CLUSTER_PATH, CONNECT_STATE_API,
};

/// Something that attaches to dealer sockets
pub trait Observer {
    fn observe(&self, socket: &Arc<DealerSocket>);
    fn unobserve(&self, socket: &Arc<DealerSocket>);
    /// Unobserve every socket
    fn disconnect(&self);
}

// =============================================================================
// Cluster observer
// =============================================================================

type ClusterCallback = Box<dyn Fn(Vec<Cluster>) + Send + Sync>;

/// Delivers the clusters of every accepted connect-state update
///
/// Payloads without `cluster`, `devices_that_changed` and `update_reason`
/// are skipped, as are update reasons other than device state changes.
pub struct ClusterObserver {
    handler: SharedHandler,
    observed: Mutex<Vec<Arc<DealerSocket>>>,
}

struct ConnectStateHandler {
    callback: ClusterCallback,
}

impl MessageHandler for ConnectStateHandler {
    fn handle(&self, message: &ParsedMessage) -> Result<(), HandlerError> {
        if message.path != CLUSTER_PATH {
            return Ok(());
        }

        let clusters: Vec<Cluster> = message
            .payloads()
            .iter()
            .filter_map(parse_cluster_update)
            .collect();

        if !clusters.is_empty() {
            (self.callback)(clusters);
        }
        Ok(())
    }
}

fn parse_cluster_update(payload: &Value) -> Option<Cluster> {
    let object = payload.as_object()?;
    if !CLUSTER_UPDATE_KEYS.iter().all(|key| object.contains_key(*key)) {
        return None;
    }

    match ClusterUpdate::deserialize(payload) {
        Ok(update) if is_accepted_reason(&update.update_reason) => Some(update.cluster),
        Ok(update) => {
            debug!(reason = %update.update_reason, "Ignoring cluster update");
            None
        }
        Err(e) => {
            debug!(error = %e, "Skipping malformed cluster update");
            None
        }
    }
}

fn is_accepted_reason(reason: &str) -> bool {
    reason == DEVICE_STATE_CHANGED || reason == INITIAL_STATE
}

impl ClusterObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Vec<Cluster>) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(ConnectStateHandler {
                callback: Box::new(callback),
            }),
            observed: Mutex::new(Vec::new()),
        }
    }

    /// Number of sockets currently observed
    pub fn observed_count(&self) -> usize {
        self.observed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Observer for ClusterObserver {
    fn observe(&self, socket: &Arc<DealerSocket>) {
        socket.register_handler(CONNECT_STATE_API, self.handler.clone());
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        if !observed.iter().any(|s| Arc::ptr_eq(s, socket)) {
            observed.push(socket.clone());
        }
    }

    fn unobserve(&self, socket: &Arc<DealerSocket>) {
        socket.unregister_handler(CONNECT_STATE_API, &self.handler);
        self.observed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| !Arc::ptr_eq(s, socket));
    }

    fn disconnect(&self) {
        let observed = std::mem::take(&mut *self.observed.lock().unwrap_or_else(|e| e.into_inner()));
        for socket in observed {
            socket.unregister_handler(CONNECT_STATE_API, &self.handler);
        }
    }
}

// =============================================================================
// Session store
// =============================================================================

/// Last seen player state per session id
#[derive(Debug, Default)]
pub struct SessionStore {
    states: HashMap<String, PlayerState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, returning the one it replaces
    pub fn replace(&mut self, state: PlayerState) -> Option<PlayerState> {
        self.states.insert(state.session_id.clone(), state)
    }

    /// Diff a snapshot against its session's baseline and make it the new baseline
    pub fn record(&mut self, state: &PlayerState) -> PlayerStateDiff {
        let diff = PlayerState::diff(self.states.get(&state.session_id), state);
        self.replace(state.clone());
        diff
    }

    pub fn get(&self, session_id: &str) -> Option<&PlayerState> {
        self.states.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

// =============================================================================
// Player state observer
// =============================================================================

/// A player state together with what changed since its session's last snapshot
#[derive(Debug, Clone)]
pub struct StateChange {
    pub diff: PlayerStateDiff,
    pub state: Arc<PlayerState>,
}

/// Emits ordered [`StateChange`] batches, one batch per dealer message
pub struct PlayerStateObserver {
    observer: ClusterObserver,
    store: Arc<Mutex<SessionStore>>,
}

impl PlayerStateObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Vec<StateChange>) + Send + Sync + 'static,
    {
        let store = Arc::new(Mutex::new(SessionStore::new()));
        let sessions = store.clone();

        let observer = ClusterObserver::new(move |clusters| {
            let changes: Vec<StateChange> = {
                let mut store = sessions.lock().unwrap_or_else(|e| e.into_inner());
                clusters
                    .iter()
                    .filter_map(|cluster| match cluster.player_state() {
                        Some(Ok(state)) => Some(StateChange {
                            diff: store.record(&state),
                            state: Arc::new(state),
                        }),
                        Some(Err(e)) => {
                            debug!(error = %e, "Skipping undecodable player state");
                            None
                        }
                        None => {
                            debug!("Skipping partial player state");
                            None
                        }
                    })
                    .collect()
            };

            if !changes.is_empty() {
                callback(changes);
            }
        });

        Self { observer, store }
    }

    /// Number of sessions with a stored baseline
    pub fn session_count(&self) -> usize {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Observer for PlayerStateObserver {
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
// Device observer
// =============================================================================

/// Change of the active device or of its volume
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    Active {
        device_id: String,
        device: Option<ClusterDevice>,
    },
    Volume {
        device_id: String,
        volume: u32,
    },
}

/// Follows the active device across clusters
pub struct DeviceObserver {
    observer: ClusterObserver,
}

impl DeviceObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Vec<DeviceChange>) + Send + Sync + 'static,
    {
        let last: Mutex<Option<ActiveDevice>> = Mutex::new(None);

        let observer = ClusterObserver::new(move |clusters| {
            let changes: Vec<DeviceChange> = {
                let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                let mut changes = Vec::new();
                for cluster in &clusters {
                    let current = ActiveDevice::from_cluster(cluster);
                    let diff = ActiveDevice::diff(last.as_ref(), &current);

                    if diff.device_id.is_different() {
                        changes.push(DeviceChange::Active {
                            device_id: current.device_id.clone(),
                            device: cluster.active_device().cloned(),
                        });
                    }
                    if diff.volume.is_different() && cluster.active_device().is_some() {
                        changes.push(DeviceChange::Volume {
                            device_id: current.device_id.clone(),
                            volume: current.volume,
                        });
                    }
                    *last = Some(current);
                }
                changes
            };

            if !changes.is_empty() {
                callback(changes);
            }
        });

        Self { observer }
    }
}

impl Observer for DeviceObserver {
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
    use beatsync_test_utils::fixtures::{cluster_frame, cluster_update, PlayerStateFixture};
    use serde_json::json;
    use std::time::Duration;

    fn socket() -> Arc<DealerSocket> {
        DealerSocket::new(Duration::from_secs(30)).0
    }

    fn collect_changes() -> (Arc<Mutex<Vec<Vec<StateChange>>>>, PlayerStateObserver) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let observer = PlayerStateObserver::new(move |changes| sink.lock().unwrap().push(changes));
        (batches, observer)
    }

    #[tokio::test]
    async fn test_first_snapshot_has_no_baseline() {
        let socket = socket();
        let (batches, observer) = collect_changes();
        observer.observe(&socket);

        let state = PlayerStateFixture::new("S1").track("spotify:track:a").to_json();
        socket.handle_text(&cluster_frame(vec![cluster_update("d1", state)]).to_string()).unwrap();

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let change = &batches[0][0];
        assert_eq!(change.diff.track.uri.old, None);
        assert!(change.diff.is_playing.is_different());
        assert_eq!(observer.session_count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_diffed_independently_in_arrival_order() {
        let socket = socket();
        let (batches, observer) = collect_changes();
        observer.observe(&socket);

        let s1 = PlayerStateFixture::new("S1").track("spotify:track:a");
        let s2 = PlayerStateFixture::new("S2").track("spotify:track:b");
        socket
            .handle_text(&cluster_frame(vec![cluster_update("d1", s1.to_json())]).to_string())
            .unwrap();
        socket
            .handle_text(
                &cluster_frame(vec![
                    cluster_update("d1", s2.to_json()),
                    cluster_update("d1", s1.clone().track("spotify:track:c").to_json()),
                ])
                .to_string(),
            )
            .unwrap();

        let batches = batches.lock().unwrap();
        let second = &batches[1];
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].state.session_id, "S2");
        assert_eq!(second[0].diff.track.uri.old, None);
        assert_eq!(second[1].state.session_id, "S1");
        assert_eq!(second[1].diff.track.uri.old.as_deref(), Some("spotify:track:a"));
        assert!(!second[1].diff.is_paused.is_different());
    }

    #[tokio::test]
    async fn test_partial_states_and_foreign_payloads_are_skipped() {
        let socket = socket();
        let (batches, observer) = collect_changes();
        observer.observe(&socket);

        let partial = json!({ "session_id": "S1", "is_playing": false });
        let frame = cluster_frame(vec![
            cluster_update("d1", partial),
            json!({ "cluster": {}, "update_reason": DEVICE_STATE_CHANGED }),
            json!("H4sIAAAAAAAA"),
        ]);
        socket.handle_text(&frame.to_string()).unwrap();

        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(observer.session_count(), 0);
    }

    #[tokio::test]
    async fn test_other_update_reasons_are_ignored() {
        let socket = socket();
        let (batches, observer) = collect_changes();
        observer.observe(&socket);

        let mut update = cluster_update("d1", PlayerStateFixture::new("S1").to_json());
        update["update_reason"] = json!("DEVICES_DISAPPEARED");
        socket.handle_text(&cluster_frame(vec![update]).to_string()).unwrap();

        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unobserve_and_disconnect() {
        let first = socket();
        let second = socket();
        let (_, observer) = collect_changes();

        observer.observe(&first);
        observer.observe(&second);
        observer.observe(&second);
        assert_eq!(observer.observer.observed_count(), 2);
        assert_eq!(second.handler_count(CONNECT_STATE_API), 1);

        observer.unobserve(&first);
        assert_eq!(first.handler_count(CONNECT_STATE_API), 0);

        observer.disconnect();
        assert_eq!(second.handler_count(CONNECT_STATE_API), 0);
        assert_eq!(observer.observer.observed_count(), 0);
    }

    #[test]
    fn test_session_store_replace_returns_previous() {
        let mut store = SessionStore::new();
        let state: PlayerState =
            serde_json::from_value(PlayerStateFixture::new("S1").to_json()).unwrap();
        assert!(store.replace(state.clone()).is_none());

        let mut next = state.clone();
        next.is_paused = true;
        let previous = store.replace(next).unwrap();
        assert!(!previous.is_paused);
        assert!(store.get("S1").unwrap().is_paused);
    }

    #[tokio::test]
    async fn test_device_and_volume_changes() {
        let socket = socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = DeviceObserver::new(move |changes| sink.lock().unwrap().extend(changes));
        observer.observe(&socket);

        let state = PlayerStateFixture::new("S1").to_json();
        let mut update = cluster_update("d1", state.clone());
        update["cluster"]["devices"] = json!({ "d1": { "device_id": "d1", "volume": 100 } });
        socket.handle_text(&cluster_frame(vec![update.clone()]).to_string()).unwrap();
        socket.handle_text(&cluster_frame(vec![update.clone()]).to_string()).unwrap();

        update["cluster"]["devices"]["d1"]["volume"] = json!(200);
        socket.handle_text(&cluster_frame(vec![update]).to_string()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], DeviceChange::Active { device_id, device: Some(_) } if device_id == "d1"));
        assert_eq!(
            seen[2],
            DeviceChange::Volume {
                device_id: "d1".to_string(),
                volume: 200
            }
        );
    }
}
