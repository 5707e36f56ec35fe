//! Dealer WebSocket connection
//!
//! Each session opens a fresh [`DealerSocket`], pumps text frames into it
//! and drains its outbound queue into the WebSocket. Once the dealer
//! assigns a connection id the hidden device is registered and the
//! cluster returned by the registration is routed as the initial state.

use std::sync::{Arc, Weak};

use anyhow::{anyhow, Context, Result};
use beatsync_core::{
    resolver::with_token, Cluster, DealerSocket, Observer, PlaybackSync, TokenSource,
};
use beatsync_spotify_client::SpotifyClient;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;

/// Keeps one dealer connection alive, reconnecting after every close
pub struct Listener {
    config: Config,
    client: Arc<SpotifyClient>,
    tokens: Arc<TokenSource>,
    sync: Arc<PlaybackSync>,
}

impl Listener {
    pub fn new(
        config: Config,
        client: Arc<SpotifyClient>,
        tokens: Arc<TokenSource>,
        sync: Arc<PlaybackSync>,
    ) -> Self {
        Self {
            config,
            client,
            tokens,
            sync,
        }
    }

    /// Run sessions forever
    pub async fn run(&self) {
        let mut attempt: u64 = 0;
        loop {
            if attempt > 0 {
                if let Err(e) = self.tokens.regenerate().await {
                    warn!(error = %e, "Failed to refresh access token before reconnecting");
                }
            }

            match self.session().await {
                Ok(()) => info!("Dealer connection closed"),
                Err(e) => error!(error = %e, "Dealer session failed"),
            }

            attempt += 1;
            let delay = self.config.reconnect_delay();
            info!(attempt, delay_secs = delay.as_secs(), "Reconnecting to dealer");
            tokio::time::sleep(delay).await;
        }
    }

    async fn dealer_url(&self) -> Result<String> {
        let token = self.tokens.current();

        if let Some(dealer) = &self.config.spotify().dealer_url {
            let mut url = Url::parse(dealer).context("Invalid SPOTIFY_DEALER_URL")?;
            url.query_pairs_mut().append_pair("access_token", &token);
            return Ok(url.into());
        }

        let discovery = self
            .client
            .discover_dealers()
            .await
            .context("Dealer discovery failed")?;
        discovery
            .websocket_url(&token)
            .ok_or_else(|| anyhow!("Dealer discovery returned no dealer"))
    }

    async fn session(&self) -> Result<()> {
        let url = self.dealer_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("Failed to connect to dealer")?;
        info!("Connected to dealer");

        let (socket, mut outbound) = DealerSocket::from_config(self.config.sync());
        self.sync.observe(&socket);
        self.register_on_connection(&socket);

        let (mut ws_tx, mut ws_rx) = stream.split();
        let result = loop {
            tokio::select! {
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = socket.handle_text(&text) {
                            warn!(error = %e, "Dropping undecodable dealer frame");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Dealer sent close");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(anyhow!(e).context("Dealer stream failed")),
                    None => break Ok(()),
                },
                Some(payload) = outbound.recv() => {
                    let text = match serde_json::to_string(&payload) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound frame");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        break Err(anyhow!(e).context("Failed to send to dealer"));
                    }
                }
            }
        };

        socket.handle_close();
        self.sync.unobserve(&socket);
        result
    }

    /// Register the hidden device whenever the dealer hands out a connection id
    fn register_on_connection(&self, socket: &Arc<DealerSocket>) {
        let weak = Arc::downgrade(socket);
        let client = self.client.clone();
        let tokens = self.tokens.clone();
        let device_id = self.config.device_id.clone();

        socket.observe_connection_id(Arc::new(move |connection_id: Option<&str>| {
            let Some(connection_id) = connection_id else {
                return;
            };
            tokio::spawn(register(
                weak.clone(),
                client.clone(),
                tokens.clone(),
                connection_id.to_string(),
                device_id.clone(),
            ));
        }));
    }
}

async fn register(
    socket: Weak<DealerSocket>,
    client: Arc<SpotifyClient>,
    tokens: Arc<TokenSource>,
    connection_id: String,
    device_id: String,
) {
    let connection_id = connection_id.as_str();
    let device_id = device_id.as_str();
    let client = client.as_ref();

    let subscribed = with_token(&tokens, |token| async move {
        client.subscribe_to_notifications(connection_id, &token).await
    })
    .await;
    if let Err(e) = subscribed {
        error!(error = %e, "Failed to subscribe to notifications");
        return;
    }

    let cluster: Cluster = match with_token(&tokens, |token| async move {
        client.connect_state::<Cluster>(connection_id, &token, device_id).await
    })
    .await
    {
        Ok(cluster) => cluster,
        Err(e) => {
            error!(error = %e, "Failed to register connect-state device");
            return;
        }
    };
    info!(device_id, active_device = %cluster.active_device_id, "Registered listening device");

    let Some(socket) = socket.upgrade() else {
        debug!("Socket closed before registration finished");
        return;
    };
    if let Err(e) = socket.inject_initial_cluster(&cluster) {
        warn!(error = %e, "Failed to route initial cluster");
    }
}
