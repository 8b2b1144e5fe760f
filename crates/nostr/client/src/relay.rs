//! Single relay connection management.

use crate::error::{ClientError, Result};
use crate::subscription::{Subscription, SubscriptionFrame};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use nostr::Event;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type SubscriptionMap = Arc<Mutex<HashMap<String, Subscription>>>;
type PendingPublishes = Arc<Mutex<HashMap<String, oneshot::Sender<(bool, String)>>>>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Relay message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Closed(String, String),
    Notice(String),
    Auth(String),
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// Frames buffered per subscription before the reader waits on the consumer.
    pub frame_buffer: usize,
    /// Upper bound on the CLOSE/close-frame exchange when tearing down.
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            frame_buffer: crate::subscription::DEFAULT_FRAME_BUFFER,
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Relay connection.
///
/// One duplex WebSocket multiplexing any number of subscriptions. Inbound
/// frames are routed to subscriptions by correlation token; frames for
/// unknown tokens are dropped. Dropping the connection aborts its reader.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: SubscriptionMap,
    pending_publishes: PendingPublishes,
    recv_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url.trim())?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            pending_publishes: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect to relay and start background receive loop.
    pub async fn connect(&self) -> Result<()> {
        let mut state_guard = self.state.write().await;
        if *state_guard == ConnectionState::Connected {
            return Err(ClientError::AlreadyConnected);
        }
        *state_guard = ConnectionState::Connecting;
        drop(state_guard);

        let connect_result = match timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(error)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(error.to_string()));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (stream, _response) = connect_result;
        let (writer, mut reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.state.write().await = ConnectionState::Connected;

        let subscriptions = Arc::clone(&self.subscriptions);
        let pending_publishes = Arc::clone(&self.pending_publishes);
        let state = Arc::clone(&self.state);
        let relay_url = self.url.to_string();

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                        Ok(Some(message)) => {
                            route_message(&relay_url, message, &subscriptions, &pending_publishes)
                                .await;
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!("protocol parse error on {}: {}", relay_url, error);
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        debug!("received ping from {} ({} bytes)", relay_url, payload.len());
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {}
                    Ok(Message::Frame(_)) => {}
                    Err(error) => {
                        warn!("websocket read error on {}: {}", relay_url, error);
                        break;
                    }
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            // Dropping the senders ends every consumer's frame stream.
            subscriptions.lock().await.clear();
            pending_publishes.lock().await.clear();
        });

        *self.recv_task.lock().await = Some(task);
        Ok(())
    }

    /// Disconnect from relay and stop background tasks. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let closing = async {
                writer.send(Message::Close(None)).await?;
                writer.close().await
            };
            match timeout(self.config.close_timeout, closing).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => debug!("close handshake failed on {}: {}", self.url, error),
                Err(_) => debug!("close handshake timed out on {}", self.url),
            }
        }

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }

        self.subscriptions.lock().await.clear();
        self.pending_publishes.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Publish event and wait up to `wait` for the relay's `OK`.
    pub async fn publish(&self, event: &Event, wait: Duration) -> Result<PublishConfirmation> {
        let (ok_tx, ok_rx) = oneshot::channel();
        self.pending_publishes
            .lock()
            .await
            .insert(event.id.clone(), ok_tx);

        if let Err(error) = self.send_json(&json!(["EVENT", event])).await {
            self.pending_publishes.lock().await.remove(&event.id);
            return Err(error);
        }

        let outcome = timeout(wait, ok_rx).await;
        self.pending_publishes.lock().await.remove(&event.id);
        match outcome {
            Ok(Ok((accepted, message))) => Ok(PublishConfirmation {
                relay_url: self.url.to_string(),
                event_id: event.id.clone(),
                accepted,
                message,
            }),
            Ok(Err(_)) => Err(ClientError::Connection(format!(
                "connection to {} closed before OK",
                self.url
            ))),
            Err(_) => Err(ClientError::Timeout(format!(
                "no OK from {} within {:?}",
                self.url, wait
            ))),
        }
    }

    /// Register and send subscription request.
    ///
    /// The subscription is registered before the REQ goes out so no frame can
    /// arrive for a token the reader does not know yet.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        let frame = subscription.request_frame()?;
        let token = subscription.id.as_str().to_string();
        self.subscriptions
            .lock()
            .await
            .insert(token.clone(), subscription);

        if let Err(error) = self.send_json(&frame).await {
            self.subscriptions.lock().await.remove(&token);
            return Err(error);
        }
        Ok(())
    }

    /// Close subscription on relay.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let was_registered = self
            .subscriptions
            .lock()
            .await
            .remove(subscription_id)
            .is_some();
        if !was_registered {
            return Ok(());
        }
        self.send_json(&json!(["CLOSE", subscription_id])).await
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Ok(mut task) = self.recv_task.try_lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }
    }
}

async fn route_message(
    relay_url: &str,
    message: RelayMessage,
    subscriptions: &SubscriptionMap,
    pending_publishes: &PendingPublishes,
) {
    let (token, frame) = match message {
        RelayMessage::Event(token, event) => (token, SubscriptionFrame::Event(event)),
        RelayMessage::Eose(token) => (token, SubscriptionFrame::EndOfStored),
        RelayMessage::Closed(token, reason) => (token, SubscriptionFrame::Closed(reason)),
        RelayMessage::Ok(event_id, accepted, message) => {
            if let Some(waiter) = pending_publishes.lock().await.remove(&event_id) {
                let _ = waiter.send((accepted, message));
            } else {
                debug!("unsolicited OK for {} from {}", event_id, relay_url);
            }
            return;
        }
        RelayMessage::Notice(notice) => {
            info!("notice from {}: {}", relay_url, notice);
            return;
        }
        RelayMessage::Auth(_) => {
            debug!("ignoring AUTH challenge from {}", relay_url);
            return;
        }
    };

    let closing = matches!(frame, SubscriptionFrame::Closed(_));
    let subscription = {
        let mut guard = subscriptions.lock().await;
        if closing {
            guard.remove(&token)
        } else {
            guard.get(&token).cloned()
        }
    };

    let Some(subscription) = subscription else {
        debug!("dropping frame for unknown subscription {} from {}", token, relay_url);
        return;
    };

    if subscription.deliver(frame).await.is_err() {
        subscriptions.lock().await.remove(&token);
    }
}

/// Parse relay protocol JSON text message into typed relay message.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    if array.is_empty() {
        return Ok(None);
    }

    let kind = array[0]
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    match kind {
        "EVENT" => {
            if array.len() < 3 {
                return Err(ClientError::Protocol("invalid EVENT message".to_string()));
            }
            let subscription_id = array[1]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid EVENT subscription id".to_string()))?
                .to_string();
            let event: Event = serde_json::from_value(array[2].clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {}", error))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            if array.len() < 4 {
                return Err(ClientError::Protocol("invalid OK message".to_string()));
            }
            let event_id = array[1]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid OK event id".to_string()))?
                .to_string();
            let accepted = array[2]
                .as_bool()
                .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
            let message = array[3]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid OK message text".to_string()))?
                .to_string();
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid EOSE message".to_string()));
            }
            let subscription_id = array[1]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid EOSE subscription id".to_string()))?
                .to_string();
            Ok(Some(RelayMessage::Eose(subscription_id)))
        }
        "CLOSED" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid CLOSED message".to_string()));
            }
            let subscription_id = array[1]
                .as_str()
                .ok_or_else(|| {
                    ClientError::Protocol("invalid CLOSED subscription id".to_string())
                })?
                .to_string();
            // The reason is optional in practice even though the protocol lists it.
            let reason = array
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Some(RelayMessage::Closed(subscription_id, reason)))
        }
        "NOTICE" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid NOTICE message".to_string()));
            }
            let message = array[1]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid NOTICE message text".to_string()))?
                .to_string();
            Ok(Some(RelayMessage::Notice(message)))
        }
        "AUTH" => {
            if array.len() < 2 {
                return Err(ClientError::Protocol("invalid AUTH message".to_string()));
            }
            let challenge = array[1]
                .as_str()
                .ok_or_else(|| ClientError::Protocol("invalid AUTH challenge".to_string()))?
                .to_string();
            Ok(Some(RelayMessage::Auth(challenge)))
        }
        _ => Ok(None),
    }
}
