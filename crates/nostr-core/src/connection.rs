//! One multiplexed websocket connection per relay.
//!
//! A background task owns the socket. Callers talk to it through an
//! outbound queue; inbound `EVENT`/`EOSE`/`CLOSED` frames are routed by
//! subscription id and `OK` frames by event id. When the socket drops, every
//! pending route is cleared so waiters observe the end instead of hanging,
//! and the task reconnects with exponential backoff until shut down.

use crate::error::RelayError;
use crate::message::{self, RelayMessage};
use crate::relay::{Connector, PublishAck, Relay, SubscriptionEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles up to `max_reconnect_delay`.
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Drop incoming events whose id or signature does not check out.
    pub verify_signatures: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            verify_signatures: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Between attempts; new requests are refused.
    Waiting,
    Closed,
}

#[derive(Default)]
struct Routes {
    subscriptions: HashMap<String, mpsc::UnboundedSender<SubscriptionEvent>>,
    acks: HashMap<String, oneshot::Sender<PublishAck>>,
}

impl Routes {
    fn clear(&mut self) {
        self.subscriptions.clear();
        self.acks.clear();
    }
}

struct PendingAck<'a> {
    shared: &'a Shared,
    event_id: String,
    rx: oneshot::Receiver<PublishAck>,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        self.shared.routes.lock().acks.remove(&self.event_id);
    }
}

struct Shared {
    url: String,
    config: ConnectionConfig,
    routes: Mutex<Routes>,
    state: Mutex<ConnectionState>,
    shutdown: CancellationToken,
}

impl Shared {
    fn new(url: &str, config: ConnectionConfig) -> Self {
        Self {
            url: url.to_string(),
            config,
            routes: Mutex::new(Routes::default()),
            state: Mutex::new(ConnectionState::Connecting),
            shutdown: CancellationToken::new(),
        }
    }

    /// Route the relay's `OK` for `event_id` to the returned handle. The
    /// route is removed when the handle drops, answered or not.
    fn expect_ack(&self, event_id: String) -> PendingAck<'_> {
        let (tx, rx) = oneshot::channel();
        self.routes.lock().acks.insert(event_id.clone(), tx);
        PendingAck {
            shared: self,
            event_id,
            rx,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn dispatch(&self, text: &str) {
        match message::parse_relay_message(text) {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if self.config.verify_signatures && event.verify().is_err() {
                    warn!("Dropping event {} from {}: verification failed", event.id, self.url);
                    return;
                }
                if let Some(tx) = self.routes.lock().subscriptions.get(&subscription_id) {
                    let _ = tx.send(SubscriptionEvent::Event(*event));
                }
            }
            RelayMessage::Eose { subscription_id } => {
                if let Some(tx) = self.routes.lock().subscriptions.get(&subscription_id) {
                    let _ = tx.send(SubscriptionEvent::Eose);
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                debug!("{} closed subscription {}: {}", self.url, subscription_id, message);
                if let Some(tx) = self.routes.lock().subscriptions.remove(&subscription_id) {
                    let _ = tx.send(SubscriptionEvent::Closed(message));
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some(tx) = self.routes.lock().acks.remove(&event_id) {
                    let _ = tx.send(PublishAck { accepted, message });
                }
            }
            RelayMessage::Notice { message } => {
                info!("Notice from {}: {}", self.url, message);
            }
            RelayMessage::Auth { .. } => {
                debug!("Ignoring AUTH challenge from {}", self.url);
            }
            RelayMessage::Unknown(raw) => {
                let preview: String = raw.chars().take(120).collect();
                debug!("Unrecognized message from {}: {}", self.url, preview);
            }
        }
    }
}

/// Handle to a relay connection running in the background.
pub struct WsRelay {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

impl WsRelay {
    /// Start connecting to `url`. Must be called inside a tokio runtime.
    pub fn spawn(url: &str, config: ConnectionConfig) -> Result<Arc<Self>, RelayError> {
        validate_relay_url(url)?;
        let shared = Arc::new(Shared::new(url, config));
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(Arc::clone(&shared), rx));
        Ok(Arc::new(Self { shared, outbound }))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
            ConnectionState::Waiting | ConnectionState::Closed => {
                Err(RelayError::Disconnected(self.shared.url.clone()))
            }
        }
    }

    fn send(&self, text: String) -> Result<(), RelayError> {
        self.outbound
            .send(text)
            .map_err(|_| RelayError::Disconnected(self.shared.url.clone()))
    }
}

impl Drop for WsRelay {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl Relay for WsRelay {
    fn url(&self) -> &str {
        &self.shared.url
    }

    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: &Filter,
    ) -> Result<mpsc::UnboundedReceiver<SubscriptionEvent>, RelayError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .routes
            .lock()
            .subscriptions
            .insert(subscription_id.to_string(), tx);

        if let Err(e) = self.send(message::req_message(subscription_id, filter)) {
            self.shared.routes.lock().subscriptions.remove(subscription_id);
            return Err(e);
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, subscription_id: &str) {
        self.shared
            .routes
            .lock()
            .subscriptions
            .remove(subscription_id);
        let _ = self.send(message::close_message(subscription_id));
    }

    async fn publish(&self, event: &Event) -> Result<PublishAck, RelayError> {
        self.ensure_open()?;
        let mut pending = self.shared.expect_ack(event.id.to_hex());
        self.send(message::event_message(event))?;
        (&mut pending.rx)
            .await
            .map_err(|_| RelayError::Disconnected(self.shared.url.clone()))
    }

    async fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

/// Opens [`WsRelay`] connections.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: ConnectionConfig,
}

impl WsConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Relay>, RelayError> {
        let relay: Arc<dyn Relay> = WsRelay::spawn(url, self.config.clone())?;
        Ok(relay)
    }
}

pub fn validate_relay_url(url: &str) -> Result<(), RelayError> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| RelayError::InvalidUrl(format!("{} (must start with ws:// or wss://)", url)))?;
    if rest.is_empty() || rest.starts_with('/') || rest.contains(char::is_whitespace) {
        return Err(RelayError::InvalidUrl(url.to_string()));
    }
    Ok(())
}

async fn run_connection(shared: Arc<Shared>, mut outbound: mpsc::UnboundedReceiver<String>) {
    let mut delay = shared.config.reconnect_delay;
    loop {
        match pump(&shared, &mut outbound, &mut delay).await {
            Ok(()) => debug!("Connection to {} ended", shared.url),
            Err(e) => warn!("Relay {} error: {}", shared.url, e),
        }
        shared.routes.lock().clear();
        if shared.shutdown.is_cancelled() {
            break;
        }

        shared.set_state(ConnectionState::Waiting);
        debug!("Reconnecting to {} in {:?}", shared.url, delay);
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(shared.config.max_reconnect_delay);

        // Requests queued while down belong to routes that were already cleared.
        while outbound.try_recv().is_ok() {}
        shared.set_state(ConnectionState::Connecting);
    }

    shared.set_state(ConnectionState::Closed);
    shared.routes.lock().clear();
    info!("Relay {} closed", shared.url);
}

async fn pump(
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    delay: &mut Duration,
) -> Result<(), RelayError> {
    let connect = tokio::time::timeout(shared.config.connect_timeout, connect_async(shared.url.as_str()));
    let (ws, _) = tokio::select! {
        _ = shared.shutdown.cancelled() => return Ok(()),
        result = connect => result
            .map_err(|_| RelayError::Timeout(format!("connecting to {}", shared.url)))?
            .map_err(|e| RelayError::WebSocket(e.to_string()))?,
    };

    info!("Connected to {}", shared.url);
    shared.set_state(ConnectionState::Connected);
    *delay = shared.config.reconnect_delay;

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                write.send(WsMessage::Close(None)).await.ok();
                return Ok(());
            }
            outgoing = outbound.recv() => {
                let Some(text) = outgoing else {
                    return Ok(());
                };
                write
                    .send(WsMessage::Text(text.into()))
                    .await
                    .map_err(|e| RelayError::WebSocket(e.to_string()))?;
            }
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(&text),
                Some(Ok(WsMessage::Ping(payload))) => {
                    write.send(WsMessage::Pong(payload)).await.ok();
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(RelayError::WebSocket(e.to_string())),
            }
        }
    }
}
