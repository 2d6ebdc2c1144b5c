//! Peer session adapter.
//!
//! A session represents one connected remote endpoint to the router. It has
//! no business logic: it only knows how to hand a frame to its endpoint.

use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Capacity of each session's outbound queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Router-assigned identifier of a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Outcome of handing one frame to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The endpoint's outbound queue is full.
    Backlogged,
    /// The endpoint is gone.
    Closed,
    /// The endpoint panicked while taking the frame.
    Faulted,
}

/// Anything the router can deliver encoded envelopes to.
///
/// `deliver` must not block and must not fail loudly: a broadcast keeps going
/// whatever one recipient reports.
pub trait PeerSink: Send + Sync {
    fn id(&self) -> SessionId;

    fn deliver(&self, frame: &str) -> Delivery;
}

/// Production sink: a bounded queue drained by the connection's writer loop.
pub struct PeerSession {
    id: SessionId,
    tx: mpsc::Sender<String>,
}

impl PeerSession {
    /// Create a session and the receiver its writer loop drains.
    pub fn new(id: SessionId) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        (Self { id, tx }, rx)
    }
}

impl PeerSink for PeerSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn deliver(&self, frame: &str) -> Delivery {
        match self.tx.try_send(frame.to_string()) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped(DropReason::Backlogged),
            Err(TrySendError::Closed(_)) => Delivery::Dropped(DropReason::Closed),
        }
    }
}
