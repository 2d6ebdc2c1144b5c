//! wsrelay-client: Rust client library for the wsrelay channel relay.
//!
//! # Quick Start
//!
//! ```no_run
//! use wsrelay_client::{ConnectConfig, RelayClient};
//! use wsrelay_core::ChannelMode;
//!
//! # async fn example() -> wsrelay_core::RelayResult<()> {
//! let client = RelayClient::connect("ws://localhost:3000", ConnectConfig {
//!     mode: ChannelMode::default(),
//!     key: "c2VjcmV0".into(),
//!     ..Default::default()
//! }).await?;
//!
//! let channel = client.send("hi", "bob").await?;
//! if let Some(msg) = client.receive(Some(channel)).await {
//!     println!("{}: {}", msg.alias, msg.content);
//! }
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod transport;

pub use client::{ClientEvent, ConnectConfig, ReceivedMessage, RelayClient};

// Re-export wsrelay-core error types for convenience.
pub use wsrelay_core::{RelayError, RelayResult};
