//! wsrelay-core: Shared protocol library for the wsrelay message relay.
//!
//! Provides the JSON wire envelope, the stable error-code taxonomy, inbound
//! request validation, and the channel-index derivation shared by the server
//! and client.

pub mod channel;
pub mod codec;
pub mod envelope;
pub mod error;

// Re-export commonly used items at crate root.
pub use channel::{ChannelMode, DEFAULT_CHANNEL_COUNT};
pub use codec::{decode_envelope, decode_request, encode, MAX_PAYLOAD_BYTES};
pub use envelope::{Envelope, ErrorBody, ErrorCode, MessageBody, SendRequest};
pub use error::{RelayError, RelayResult};
