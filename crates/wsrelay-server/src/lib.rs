//! wsrelay-server: real-time channel relay.
//!
//! Clients connect over WebSocket, publish short text messages tagged with a
//! sender alias, and the relay fans each message out to the other subscribers
//! of the same channel.
//!
//! Module overview:
//! - `relay`:     The channel router. Validates inbound envelopes, owns the
//!                channel table (subscriber sets + last-message cache), and
//!                broadcasts.
//! - `session`:   Peer session adapter the router delivers through.
//! - `transport`: WebSocket listener and frame helpers.
//! - `server`:    Accept loop and per-connection session loop.
//! - `config`:    TOML config file + CLI overrides.
//! - `console`:   Operator line commands (pause, resume, inject, inspect).

pub mod config;
pub mod console;
pub mod relay;
pub mod server;
pub mod session;
pub mod transport;

pub use relay::{ChannelRouter, InboundOutcome, LastMessage, ListenOutcome, ModeChange};
pub use server::RelayServer;
pub use session::{Delivery, PeerSession, PeerSink, SessionId};
