//! A single broadcast group: its subscriber set and last-message cache.
//!
//! Membership is channel-local and implicit. A session joins a channel the
//! moment it successfully publishes into it, and leaves only when it
//! disconnects.

use crate::session::{Delivery, DropReason, PeerSink, SessionId};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use wsrelay_core::MessageBody;

/// The cached `(alias, content)` of a channel's most recent publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    pub alias: String,
    pub content: String,
}

/// Counts from one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// One broadcast group.
pub struct Channel {
    index: usize,
    subscribers: BTreeMap<SessionId, Arc<dyn PeerSink>>,
    last_message: Option<MessageBody>,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            subscribers: BTreeMap::new(),
            last_message: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Add a session to the subscriber set. Returns `true` if it was new.
    pub fn subscribe(&mut self, peer: Arc<dyn PeerSink>) -> bool {
        let id = peer.id();
        let added = self.subscribers.insert(id, peer).is_none();
        if added {
            debug!(channel = self.index, session = %id, "subscribed");
        }
        added
    }

    /// Remove a session. Returns `true` if it was subscribed.
    pub fn unsubscribe(&mut self, id: SessionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn is_subscribed(&self, id: SessionId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Overwrite the cache with the latest accepted message.
    pub fn set_last_message(&mut self, body: MessageBody) {
        self.last_message = Some(body);
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        self.last_message.as_ref().map(|body| LastMessage {
            alias: body.alias.clone(),
            content: body.content.clone(),
        })
    }

    pub fn has_last_message(&self) -> bool {
        self.last_message.is_some()
    }

    /// Deliver `frame` to every current subscriber.
    ///
    /// A dropped delivery is logged and counted; it never stops the loop. A
    /// subscriber that panics while taking the frame is counted as dropped
    /// and evicted from the channel.
    pub fn broadcast(&mut self, frame: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut faulted = Vec::new();
        for (id, peer) in &self.subscribers {
            let delivery = panic::catch_unwind(AssertUnwindSafe(|| peer.deliver(frame)))
                .unwrap_or(Delivery::Dropped(DropReason::Faulted));
            match delivery {
                Delivery::Sent => report.delivered += 1,
                Delivery::Dropped(DropReason::Faulted) => {
                    report.dropped += 1;
                    faulted.push(*id);
                    error!(channel = self.index, session = %id, "subscriber panicked during delivery");
                }
                Delivery::Dropped(reason) => {
                    report.dropped += 1;
                    warn!(channel = self.index, session = %id, ?reason, "delivery dropped");
                }
            }
        }
        for id in faulted {
            self.subscribers.remove(&id);
            warn!(channel = self.index, session = %id, "faulted subscriber evicted");
        }
        report
    }
}
