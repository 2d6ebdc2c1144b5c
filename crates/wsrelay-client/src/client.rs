//! The relay client.
//!
//! `RelayClient` owns one WebSocket connection. A background reader task
//! decodes server frames, caches the latest `deliver` per channel, and fans
//! events out to subscribers. Reads are point-in-time (`receive`) or pushed
//! (`subscribe`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::Message;

use wsrelay_core::{
    decode_envelope, encode, ChannelMode, Envelope, ErrorCode, RelayError, RelayResult,
};

use crate::transport::{self, ClientStream};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Configuration for connecting to a relay.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Must match the server's mode for `receive` to pick the right channel.
    pub mode: ChannelMode,
    /// Shared key presented on every publish.
    pub key: String,
    /// Connection timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            mode: ChannelMode::default(),
            key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// A message delivered by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub channel: usize,
    pub alias: String,
    pub content: String,
}

/// Pushed to every `subscribe` receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(ReceivedMessage),
    Rejected { code: ErrorCode, message: String },
    Closed,
}

type Sink = SplitSink<ClientStream, Message>;

/// Connection-scoped state shared with the reader task.
#[derive(Default)]
struct Inbox {
    last_messages: HashMap<usize, ReceivedMessage>,
    last_rejection: Option<(ErrorCode, String)>,
}

/// A connected relay client.
pub struct RelayClient {
    mode: ChannelMode,
    key: String,
    sink: Arc<Mutex<Sink>>,
    inbox: Arc<Mutex<Inbox>>,
    events: broadcast::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub async fn connect(url: &str, config: ConnectConfig) -> RelayResult<Self> {
        if config.key.is_empty() {
            return Err(RelayError::InvalidConfiguration(
                "a non-empty key is required".into(),
            ));
        }

        let ws_stream =
            transport::connect(url, Duration::from_secs(config.timeout_secs)).await?;
        let (sink, stream) = ws_stream.split();

        let sink = Arc::new(Mutex::new(sink));
        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(read_loop(
            stream,
            config.mode,
            sink.clone(),
            inbox.clone(),
            events.clone(),
            connected.clone(),
        ));

        Ok(Self {
            mode: config.mode,
            key: config.key,
            sink,
            inbox,
            events,
            connected,
            reader_handle,
        })
    }

    /// Publish `content` under `alias`.
    ///
    /// Returns the channel index the relay will route the message to.
    pub async fn send(&self, content: &str, alias: &str) -> RelayResult<usize> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        if alias.is_empty() || content.is_empty() {
            return Err(RelayError::InvalidMessage(
                "alias and content are required".into(),
            ));
        }

        let frame = encode(&Envelope::send(&self.key, alias, content))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(frame))
            .await
            .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))?;

        let channel = self.mode.index_for(alias);
        tracing::debug!(channel, alias, "message sent");
        Ok(channel)
    }

    /// The last message received on `channel` (0-based; `None` means 0).
    ///
    /// Absent when disconnected, out of range, or nothing has arrived yet.
    ///
    /// `deliver` frames carry no channel number, so each one is filed under
    /// the channel its alias maps to in this client's mode. A server-side
    /// publish to a channel that differs from its alias's channel is cached
    /// under the alias's channel instead.
    pub async fn receive(&self, channel: Option<usize>) -> Option<ReceivedMessage> {
        if !self.is_connected() {
            tracing::warn!("receive called while disconnected");
            return None;
        }

        let index = match self.mode {
            ChannelMode::Single => 0,
            ChannelMode::Multi(_) => channel.unwrap_or(0),
        };
        if !self.mode.contains(index) {
            tracing::warn!(channel = index, "channel out of range");
            return None;
        }

        self.inbox.lock().await.last_messages.get(&index).cloned()
    }

    /// Push-based stream of everything the relay sends this client.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// The most recent error envelope from the relay.
    pub async fn last_rejection(&self) -> Option<(ErrorCode, String)> {
        self.inbox.lock().await.last_rejection.clone()
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the connection.
    pub async fn disconnect(&self) -> RelayResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(RelayError::NotConnected);
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        self.reader_handle.abort();
        let _ = self.events.send(ClientEvent::Closed);
        tracing::info!("disconnected");
        Ok(())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Decode server frames until the socket closes.
async fn read_loop(
    mut stream: SplitStream<ClientStream>,
    mode: ChannelMode,
    sink: Arc<Mutex<Sink>>,
    inbox: Arc<Mutex<Inbox>>,
    events: broadcast::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        let data = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(payload)) => {
                let _ = sink.lock().await.send(Message::Pong(payload)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("WebSocket close frame received");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket read error: {}", e);
                break;
            }
        };

        match decode_envelope(&data) {
            Ok(envelope) => handle_envelope(envelope, mode, &inbox, &events).await,
            Err(e) => tracing::warn!(error = %e, "undecodable frame from relay"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(ClientEvent::Closed);
    tracing::debug!("reader loop ended");
}

async fn handle_envelope(
    envelope: Envelope,
    mode: ChannelMode,
    inbox: &Mutex<Inbox>,
    events: &broadcast::Sender<ClientEvent>,
) {
    match envelope {
        Envelope::Deliver(body) => {
            let received = ReceivedMessage {
                channel: mode.index_for(&body.alias),
                alias: body.alias,
                content: body.content,
            };
            tracing::debug!(channel = received.channel, alias = %received.alias, "message received");
            inbox
                .lock()
                .await
                .last_messages
                .insert(received.channel, received.clone());
            let _ = events.send(ClientEvent::Message(received));
        }
        Envelope::Error(body) => {
            tracing::warn!(code = %body.code, message = %body.message, "relay rejected request");
            inbox.lock().await.last_rejection = Some((body.code, body.message.clone()));
            let _ = events.send(ClientEvent::Rejected {
                code: body.code,
                message: body.message,
            });
        }
        Envelope::Send(_) => {
            tracing::warn!("relay sent a send envelope, ignoring");
        }
    }
}
