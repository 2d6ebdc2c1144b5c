use thiserror::Error;

/// Errors produced by the wsrelay libraries.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(usize),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Codec(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
