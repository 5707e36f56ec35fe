//! Dealer socket: frame decoding, routing and keep-alive
//!
//! The socket does not own a network connection. The transport task feeds
//! it decoded frames through [`DealerSocket::handle_text`] and drains the
//! outbound receiver returned by [`DealerSocket::new`]. Messages are routed
//! by the host part of their URI (`hm://connect-state/v1/cluster` routes
//! to `connect-state`) to every handler registered for that API.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beatsync_shared_config::SyncConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{CoreError, CoreResult, HandlerError};
use crate::model::{Cluster, INITIAL_STATE};

/// API carrying cluster updates
pub const CONNECT_STATE_API: &str = "connect-state";

/// Path of cluster updates within [`CONNECT_STATE_API`]
pub const CLUSTER_PATH: &str = "/v1/cluster";

const PUSHER_API: &str = "pusher";
const CONNECTION_ID_HEADER: &str = "Spotify-Connection-Id";
const SOCKET_EVENT_CAPACITY: usize = 16;

// =============================================================================
// Frames
// =============================================================================

/// A frame exchanged with the dealer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DealerPayload {
    Ping,
    Pong,
    Message(DealerMessage),
}

/// Body of a `message` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealerMessage {
    pub uri: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payloads: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl DealerMessage {
    /// Header lookup, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A message with its URI split into routing parts
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Routing key, e.g. `connect-state`
    pub api: String,
    /// e.g. `/v1/cluster`
    pub path: String,
    /// Non-empty path segments, e.g. `["v1", "cluster"]`
    pub path_components: Vec<String>,
    pub url: Url,
    pub message: DealerMessage,
}

impl ParsedMessage {
    /// Parse the message URI, retrying with an `hm://` prefix
    ///
    /// Returns `None` if neither form is a valid URL.
    pub fn parse(message: DealerMessage) -> Option<Self> {
        let url = Url::parse(&message.uri)
            .or_else(|_| Url::parse(&format!("hm://{}", message.uri)))
            .ok()?;

        let api = url.host_str().unwrap_or_default().to_string();
        let path = url.path().to_string();
        let path_components = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            api,
            path,
            path_components,
            url,
            message,
        })
    }

    pub fn payloads(&self) -> &[Value] {
        &self.message.payloads
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Receives every message routed to the API it is registered under
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &ParsedMessage) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&ParsedMessage) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &ParsedMessage) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Registered handlers are identified by their allocation
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Notified whenever the dealer assigns (or drops) a connection id
pub type ConnectionIdObserver = Arc<dyn Fn(Option<&str>) + Send + Sync>;

fn same_allocation<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Lifecycle notifications of a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    ConnectionId(Option<String>),
    Closed,
}

// =============================================================================
// Socket
// =============================================================================

/// Routes dealer frames to registered handlers and keeps the connection alive
pub struct DealerSocket {
    handlers: DashMap<String, Vec<SharedHandler>>,
    connection_observers: Mutex<Vec<ConnectionIdObserver>>,
    connection_id: Mutex<Option<String>>,
    started_ping: AtomicBool,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    ping_interval: Duration,
    outbound: mpsc::UnboundedSender<DealerPayload>,
    events: broadcast::Sender<SocketEvent>,
}

impl std::fmt::Debug for DealerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DealerSocket")
            .field("apis", &self.handlers.len())
            .field("connection_id", &self.connection_id())
            .field("ping_interval", &self.ping_interval)
            .finish()
    }
}

impl DealerSocket {
    /// Create a socket and the receiver the transport drains outbound frames from
    pub fn new(ping_interval: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<DealerPayload>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(SOCKET_EVENT_CAPACITY);

        let socket = Arc::new(Self {
            handlers: DashMap::new(),
            connection_observers: Mutex::new(Vec::new()),
            connection_id: Mutex::new(None),
            started_ping: AtomicBool::new(false),
            ping_task: Mutex::new(None),
            ping_interval,
            outbound,
            events,
        });

        (socket, receiver)
    }

    pub fn from_config(config: &SyncConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<DealerPayload>) {
        Self::new(config.ping_interval())
    }

    /// Register a handler for an API; registering the same handler twice is a no-op
    pub fn register_handler(&self, api: &str, handler: SharedHandler) {
        let mut handlers = self.handlers.entry(api.to_string()).or_default();
        if !handlers.iter().any(|h| same_allocation(h, &handler)) {
            handlers.push(handler);
        }
    }

    /// Remove a handler; the API entry disappears with its last handler
    pub fn unregister_handler(&self, api: &str, handler: &SharedHandler) {
        if let Some(mut handlers) = self.handlers.get_mut(api) {
            handlers.retain(|h| !same_allocation(h, handler));
        }
        self.handlers.remove_if(api, |_, handlers| handlers.is_empty());
    }

    /// Number of handlers registered for an API
    pub fn handler_count(&self, api: &str) -> usize {
        self.handlers.get(api).map_or(0, |handlers| handlers.len())
    }

    pub fn observe_connection_id(&self, observer: ConnectionIdObserver) {
        let mut observers = self
            .connection_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !observers.iter().any(|o| same_allocation(o, &observer)) {
            observers.push(observer);
        }
    }

    pub fn unobserve_connection_id(&self, observer: &ConnectionIdObserver) {
        self.connection_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|o| !same_allocation(o, observer));
    }

    /// Connection id assigned by the dealer, if connected
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }

    /// Decode a text frame and handle it
    pub fn handle_text(&self, text: &str) -> CoreResult<()> {
        let payload: DealerPayload = serde_json::from_str(text)?;
        self.handle_payload(payload);
        Ok(())
    }

    /// Handle one decoded frame
    pub fn handle_payload(&self, payload: DealerPayload) {
        match payload {
            DealerPayload::Pong => {
                debug!("Dealer ponged");
                self.deferred_ping();
            }
            DealerPayload::Message(message) => self.dispatch(message),
            DealerPayload::Ping => debug!("Unexpected ping from dealer"),
        }
    }

    fn dispatch(&self, message: DealerMessage) {
        let Some(parsed) = ParsedMessage::parse(message) else {
            debug!("Dropping message with unparseable uri");
            return;
        };

        if parsed.api == PUSHER_API {
            self.handle_pusher(&parsed);
        }

        // Cloned so handlers may (un)register while being dispatched to
        let handlers = match self.handlers.get(&parsed.api) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&parsed))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(api = %parsed.api, path = %parsed.path, error = %e, "Message handler failed");
                }
                Err(_) => {
                    error!(api = %parsed.api, path = %parsed.path, "Message handler panicked");
                }
            }
        }
    }

    fn handle_pusher(&self, message: &ParsedMessage) {
        let is_connections = matches!(
            message.path_components.as_slice(),
            [version, resource, ..] if version == "v1" && resource == "connections"
        );
        if !is_connections {
            return;
        }

        let connection_id = message.message.header(CONNECTION_ID_HEADER).map(str::to_string);
        debug!(connection_id = ?connection_id, "Dealer assigned connection id");
        self.set_connection_id(connection_id);

        if !self.started_ping.swap(true, Ordering::SeqCst) {
            self.ping();
        }
    }

    fn set_connection_id(&self, connection_id: Option<String>) {
        *self
            .connection_id
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = connection_id.clone();

        let observers = self
            .connection_observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(connection_id.as_deref());
        }

        let _ = self.events.send(SocketEvent::ConnectionId(connection_id));
    }

    /// Queue a frame for the transport
    pub fn send(&self, payload: DealerPayload) -> CoreResult<()> {
        self.outbound
            .send(payload)
            .map_err(|_| CoreError::TransportClosed)
    }

    fn ping(&self) {
        debug!("Sending ping");
        if let Err(e) = self.send(DealerPayload::Ping) {
            warn!(error = %e, "Failed to queue ping");
        }
    }

    fn deferred_ping(&self) {
        let outbound = self.outbound.clone();
        let interval = self.ping_interval;
        debug!(interval_ms = interval.as_millis() as u64, "Scheduling deferred ping");

        let task = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = outbound.send(DealerPayload::Ping);
        });

        let previous = self
            .ping_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Route a synthetic `INITIAL_STATE` cluster update
    ///
    /// Used after registering with connect-state, whose response carries the
    /// cluster as it was before any push arrived.
    pub fn inject_initial_cluster(&self, cluster: &Cluster) -> CoreResult<()> {
        let update = json!({
            "ack_id": "none",
            "cluster": serde_json::to_value(cluster)?,
            "devices_that_changed": [cluster.active_device_id],
            "update_reason": INITIAL_STATE,
        });

        self.dispatch(DealerMessage {
            uri: format!("hm://{}{}", CONNECT_STATE_API, CLUSTER_PATH),
            headers: HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            payloads: vec![update],
            method: None,
        });
        Ok(())
    }

    /// Reset connection state after the transport closed and notify subscribers
    pub fn handle_close(&self) {
        debug!("Dealer connection closed");
        if let Some(task) = self
            .ping_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.started_ping.store(false, Ordering::SeqCst);
        self.set_connection_id(None);
        let _ = self.events.send(SocketEvent::Closed);
    }
}
