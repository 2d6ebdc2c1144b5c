//! The channel router: sole arbiter of channel membership, message
//! validation, and broadcast.
//!
//! One `ChannelRouter` is built at process start and shared by `Arc` with
//! every connection task. All channel state sits behind a single `RwLock`, so
//! a publish (validate, cache, fan out, subscribe) is never interleaved with
//! another publish or a disconnect.

use super::channel::{BroadcastReport, Channel, LastMessage};
use crate::session::{PeerSink, SessionId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use wsrelay_core::{
    decode_request, encode, ChannelMode, Envelope, ErrorCode, MessageBody, RelayError,
    RelayResult, SendRequest,
};

/// Result of a `configure_mode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    Applied(ChannelMode),
    /// The router is already listening; the mode was left as `current`.
    Locked { current: ChannelMode },
}

/// Result of a `listen` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Started,
    AlreadyListening,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Relayed {
        channel: usize,
        report: BroadcastReport,
    },
    /// An error envelope with this code went back to the sender.
    Rejected(ErrorCode),
}

/// Point-in-time snapshot for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub mode: ChannelMode,
    pub listening: bool,
    pub accepting: bool,
    pub channels: usize,
    pub subscriptions: usize,
    pub cached_messages: usize,
}

struct RouterState {
    mode: ChannelMode,
    listening: bool,
    accepting: bool,
    shared_key: String,
    channels: Vec<Channel>,
}

/// Process-wide relay state and the operations on it.
pub struct ChannelRouter {
    state: RwLock<RouterState>,
    next_session_id: AtomicU64,
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRouter {
    /// Create an idle router in the default multi-channel mode.
    pub fn new() -> Self {
        Self::with_mode(ChannelMode::default())
    }

    /// Create an idle router with an initial mode.
    pub fn with_mode(mode: ChannelMode) -> Self {
        Self {
            state: RwLock::new(RouterState {
                mode,
                listening: false,
                accepting: false,
                shared_key: String::new(),
                channels: Vec::new(),
            }),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Set the channel mode. Only takes effect before `listen`.
    ///
    /// After `listen` the call is a logged no-op reporting
    /// [`ModeChange::Locked`]; the router keeps running under its current mode.
    pub async fn configure_mode(&self, mode: ChannelMode) -> RelayResult<ModeChange> {
        let mut state = self.state.write().await;
        if state.listening {
            warn!(requested = %mode, current = %state.mode, "cannot change mode after listen");
            return Ok(ModeChange::Locked {
                current: state.mode,
            });
        }
        if let ChannelMode::Multi(0) = mode {
            return Err(RelayError::InvalidConfiguration(
                "channel count must be greater than 0".into(),
            ));
        }
        state.mode = mode;
        info!(mode = %mode, "channel mode set");
        Ok(ModeChange::Applied(mode))
    }

    /// Lock the mode, store the shared key, allocate channels, and start
    /// accepting publishes.
    ///
    /// A second call while listening changes nothing.
    pub async fn listen(&self, shared_key: &str) -> RelayResult<ListenOutcome> {
        if shared_key.is_empty() {
            return Err(RelayError::InvalidConfiguration(
                "a non-empty shared key is required".into(),
            ));
        }

        let mut state = self.state.write().await;
        if state.listening {
            debug!("listen called while already listening");
            return Ok(ListenOutcome::AlreadyListening);
        }

        let count = state.mode.channel_count();
        state.channels = (0..count).map(Channel::new).collect();
        state.shared_key = shared_key.to_string();
        state.listening = true;
        state.accepting = true;

        info!(mode = %state.mode, channels = count, "router listening");
        Ok(ListenOutcome::Started)
    }

    /// Run one inbound frame through the publish pipeline.
    ///
    /// Every rejection is answered with an `error` envelope to `peer` only.
    /// Nothing here can fail the connection.
    pub async fn on_inbound_message(
        &self,
        peer: &Arc<dyn PeerSink>,
        raw: &[u8],
    ) -> InboundOutcome {
        let mut state = self.state.write().await;

        if !state.accepting {
            return reject(peer, ErrorCode::ServerPaused);
        }

        let request = match decode_request(raw) {
            Ok(request) => request,
            Err(code) => return reject(peer, code),
        };

        if request.key != state.shared_key {
            return reject(peer, ErrorCode::AuthMismatch);
        }

        let routed = panic::catch_unwind(AssertUnwindSafe(|| state.route(peer, request)));
        match routed {
            Ok(Ok((channel, report))) => InboundOutcome::Relayed { channel, report },
            Ok(Err(e)) => {
                warn!(session = %peer.id(), error = %e, "routing failed");
                reject(peer, ErrorCode::InternalError)
            }
            Err(_) => {
                error!(session = %peer.id(), "routing panicked");
                reject(peer, ErrorCode::InternalError)
            }
        }
    }

    /// Drop a session from every channel. Safe to call more than once.
    pub async fn on_session_closed(&self, id: SessionId) -> usize {
        let mut state = self.state.write().await;
        let removed = state
            .channels
            .iter_mut()
            .map(|channel| channel.unsubscribe(id))
            .filter(|removed| *removed)
            .count();
        debug!(session = %id, channels = removed, "session closed");
        removed
    }

    /// Stop accepting publishes. Connections, subscribers, and cached
    /// messages are kept.
    pub async fn pause(&self) {
        self.state.write().await.accepting = false;
        info!("router paused, connections remain but publishes are rejected");
    }

    /// Resume accepting publishes.
    pub async fn resume(&self) {
        self.state.write().await.accepting = true;
        info!("router accepting publishes again");
    }

    /// The cached `(alias, content)` of a channel, if any. Out-of-range
    /// indices read as absent.
    pub async fn get_last_message(&self, channel: usize) -> Option<LastMessage> {
        let state = self.state.read().await;
        state.channels.get(channel).and_then(Channel::last_message)
    }

    /// Server-originated broadcast that bypasses client auth.
    ///
    /// `channel` picks the recipients; `alias` is sent as-is. Clients file a
    /// `deliver` by its alias's channel, so pick an alias that maps to
    /// `channel` if clients read the message back with `receive`.
    pub async fn publish(
        &self,
        channel: usize,
        alias: &str,
        content: &str,
    ) -> RelayResult<BroadcastReport> {
        let mut state = self.state.write().await;
        let key = state.shared_key.clone();
        let target = state
            .channels
            .get_mut(channel)
            .ok_or(RelayError::InvalidChannel(channel))?;

        let body = MessageBody {
            key,
            content: content.to_string(),
            alias: alias.to_string(),
        };
        let frame = encode(&Envelope::Deliver(body.clone()))?;
        let report = target.broadcast(&frame);
        target.set_last_message(body);

        info!(channel, alias = %alias, delivered = report.delivered, "server message published");
        Ok(report)
    }

    /// Hand out a fresh session identifier.
    pub fn allocate_session_id(&self) -> SessionId {
        SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn mode(&self) -> ChannelMode {
        self.state.read().await.mode
    }

    pub async fn is_listening(&self) -> bool {
        self.state.read().await.listening
    }

    pub async fn is_accepting(&self) -> bool {
        self.state.read().await.accepting
    }

    /// Subscribers of one channel; 0 for an unknown channel.
    pub async fn subscriber_count(&self, channel: usize) -> usize {
        let state = self.state.read().await;
        state
            .channels
            .get(channel)
            .map_or(0, Channel::subscriber_count)
    }

    pub async fn stats(&self) -> RouterStats {
        let state = self.state.read().await;
        RouterStats {
            mode: state.mode,
            listening: state.listening,
            accepting: state.accepting,
            channels: state.channels.len(),
            subscriptions: state.channels.iter().map(Channel::subscriber_count).sum(),
            cached_messages: state.channels.iter().filter(|c| c.has_last_message()).count(),
        }
    }
}

impl RouterState {
    /// Fan out, cache, then subscribe the sender.
    ///
    /// The sender joins after the broadcast, so it does not receive its own
    /// first message on a channel. The cache is only written once the
    /// fan-out has finished.
    fn route(
        &mut self,
        peer: &Arc<dyn PeerSink>,
        request: SendRequest,
    ) -> RelayResult<(usize, BroadcastReport)> {
        let index = self.mode.index_for(&request.alias);
        let key = self.shared_key.clone();
        let channel = self
            .channels
            .get_mut(index)
            .ok_or(RelayError::InvalidChannel(index))?;

        let body = MessageBody {
            key,
            content: request.content,
            alias: request.alias,
        };
        let frame = encode(&Envelope::Deliver(body.clone()))?;

        info!(channel = index, alias = %body.alias, session = %peer.id(), "message relayed");
        debug!(channel = index, content = %body.content, "relayed content");

        let report = channel.broadcast(&frame);
        channel.set_last_message(body);
        channel.subscribe(peer.clone());

        debug!(
            channel = index,
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast complete"
        );
        Ok((index, report))
    }
}

/// Send an error envelope back to `peer` and report the rejection.
fn reject(peer: &Arc<dyn PeerSink>, code: ErrorCode) -> InboundOutcome {
    warn!(session = %peer.id(), code = %code, "request rejected");
    match encode(&Envelope::error(code)) {
        Ok(frame) => {
            peer.deliver(&frame);
        }
        Err(e) => error!(error = %e, "failed to encode error envelope"),
    }
    InboundOutcome::Rejected(code)
}
