//! Wire envelope exchanged between clients and the relay.
//!
//! Every transport frame carries exactly one JSON object discriminated by its
//! `type` field:
//!
//! ```text
//! send:    { "type": "send",    "key": "...", "content": "...", "alias": "..." }
//! deliver: { "type": "deliver", "key": "...", "content": "...", "alias": "..." }
//! error:   { "type": "error",   "code": "...", "message": "..." }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Client → server publish request.
    Send(MessageBody),
    /// Server → client broadcast of an accepted publish.
    Deliver(MessageBody),
    /// Server → client failure notice.
    Error(ErrorBody),
}

/// Payload shared by `send` and `deliver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub key: String,
    pub content: String,
    pub alias: String,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Stable, machine-readable rejection codes.
///
/// Serialized as the variant name, so clients can branch on `code` without
/// parsing `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ServerPaused,
    MalformedPayload,
    MissingField,
    UnsupportedType,
    AuthMismatch,
    InternalError,
    InvalidChannel,
    InvalidConfiguration,
}

impl ErrorCode {
    /// The stable identifier as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerPaused => "ServerPaused",
            Self::MalformedPayload => "MalformedPayload",
            Self::MissingField => "MissingField",
            Self::UnsupportedType => "UnsupportedType",
            Self::AuthMismatch => "AuthMismatch",
            Self::InternalError => "InternalError",
            Self::InvalidChannel => "InvalidChannel",
            Self::InvalidConfiguration => "InvalidConfiguration",
        }
    }

    /// Default human-readable explanation sent alongside the code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::ServerPaused => "server is not currently accepting requests",
            Self::MalformedPayload => "payload is not a well-formed envelope",
            Self::MissingField => "missing required fields in request",
            Self::UnsupportedType => "unsupported request type",
            Self::AuthMismatch => "authentication key mismatch",
            Self::InternalError => "an error occurred during server processing",
            Self::InvalidChannel => "channel index is out of range",
            Self::InvalidConfiguration => "invalid relay configuration",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    /// Build an `error` envelope carrying the code's default message.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error(ErrorBody {
            code,
            message: code.default_message().to_string(),
        })
    }

    /// Build a `deliver` envelope.
    pub fn deliver(key: &str, alias: &str, content: &str) -> Self {
        Self::Deliver(MessageBody {
            key: key.to_string(),
            content: content.to_string(),
            alias: alias.to_string(),
        })
    }

    /// Build a `send` envelope.
    pub fn send(key: &str, alias: &str, content: &str) -> Self {
        Self::Send(MessageBody {
            key: key.to_string(),
            content: content.to_string(),
            alias: alias.to_string(),
        })
    }
}

/// A `send` envelope that passed structural validation.
///
/// The key has not yet been compared against the shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub key: String,
    pub content: String,
    pub alias: String,
}

/// Inbound shape before validation: every field optional so the pipeline can
/// tell a missing field apart from an unsupported type.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub key: Option<String>,
    pub content: Option<String>,
    pub alias: Option<String>,
}

impl RawRequest {
    /// Required fields first, then the type.
    pub(crate) fn validate(self) -> Result<SendRequest, ErrorCode> {
        let (Some(key), Some(content), Some(alias)) = (
            non_empty(self.key),
            non_empty(self.content),
            non_empty(self.alias),
        ) else {
            return Err(ErrorCode::MissingField);
        };

        if self.kind.as_deref() != Some("send") {
            return Err(ErrorCode::UnsupportedType);
        }

        Ok(SendRequest { key, content, alias })
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}
