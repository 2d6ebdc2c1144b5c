//! WebSocket listener using tokio-tungstenite.
//!
//! Every frame carries one JSON envelope. Text and binary frames are both
//! accepted inbound; outbound envelopes go out as text.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};
use wsrelay_core::{RelayError, RelayResult};

/// An accepted, upgraded WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Spawn the accept loop on an already-bound listener.
///
/// Returns a receiver that yields connections whose WebSocket handshake
/// completed. Failed handshakes are logged and skipped.
pub fn start_listener(tcp_listener: TcpListener) -> mpsc::Receiver<WebSocketConnection> {
    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("connection receiver dropped, stopping accept loop");
                break;
            }
        }
    });

    rx
}

/// Send one encoded envelope as a text frame.
pub async fn ws_send_text(ws: &mut WebSocketStream<TcpStream>, frame: &str) -> RelayResult<()> {
    ws.send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Receive the next payload-bearing frame.
///
/// Returns `None` once the peer closes. Pings are answered inline.
pub async fn ws_recv_payload(
    ws: &mut WebSocketStream<TcpStream>,
) -> RelayResult<Option<Vec<u8>>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
            Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

/// Send a close frame, ignoring a peer that is already gone.
pub async fn ws_close(ws: &mut WebSocketStream<TcpStream>) {
    let _ = ws.close(None).await;
}
