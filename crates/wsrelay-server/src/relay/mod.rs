//! Channel router: channel table and the publish pipeline.

pub mod channel;
pub mod router;

pub use channel::{BroadcastReport, Channel, LastMessage};
pub use router::{ChannelRouter, InboundOutcome, ListenOutcome, ModeChange, RouterStats};
