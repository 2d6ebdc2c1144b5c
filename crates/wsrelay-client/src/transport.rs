//! WebSocket transport for the relay client.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsrelay_core::{RelayError, RelayResult};

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Check that `url` uses a WebSocket scheme.
pub fn validate_url(url: &str) -> RelayResult<()> {
    let lower = url.to_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(())
    } else {
        Err(RelayError::Transport(format!(
            "unsupported URL scheme: {url} (expected ws:// or wss://)"
        )))
    }
}

/// Open a WebSocket connection, giving up after `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> RelayResult<ClientStream> {
    validate_url(url)?;

    let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(|e| RelayError::Transport(format!("WebSocket connect error: {e}")))?;

    tracing::info!("WebSocket connected to {}", url);
    Ok(ws_stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_websocket_schemes() {
        assert!(validate_url("ws://localhost:3000").is_ok());
        assert!(validate_url("WSS://example.com/relay").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(validate_url("http://example.com").is_err());
        assert!(validate_url("localhost:3000").is_err());
    }
}
