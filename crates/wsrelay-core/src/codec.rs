//! JSON codec for wsrelay envelopes.
//!
//! One envelope per transport frame; no length prefix is needed because the
//! WebSocket layer already delimits messages.

use crate::envelope::{Envelope, ErrorCode, RawRequest, SendRequest};
use crate::error::RelayResult;

/// Largest inbound payload the relay will try to decode (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Encode an envelope as a JSON text frame.
pub fn encode(envelope: &Envelope) -> RelayResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a strictly-typed envelope (used by clients reading server frames).
pub fn decode_envelope(data: &[u8]) -> RelayResult<Envelope> {
    Ok(serde_json::from_slice(data)?)
}

/// Decode and structurally validate an inbound publish request.
///
/// Runs the decode, required-field, and type checks in that order and
/// reports the first failure as a wire error code.
pub fn decode_request(data: &[u8]) -> Result<SendRequest, ErrorCode> {
    if data.len() > MAX_PAYLOAD_BYTES {
        return Err(ErrorCode::MalformedPayload);
    }
    // Decode through a map so positional arrays cannot pass as a request.
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(data).map_err(|_| ErrorCode::MalformedPayload)?;
    let raw: RawRequest = serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|_| ErrorCode::MalformedPayload)?;
    raw.validate()
}
