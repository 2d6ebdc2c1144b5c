//! Relay server: binds the WebSocket listener and runs one session loop per
//! connection, feeding inbound frames to the shared [`ChannelRouter`].

use crate::relay::{ChannelRouter, ListenOutcome};
use crate::session::{PeerSession, PeerSink};
use crate::transport::websocket::{self, WebSocketConnection};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use wsrelay_core::{RelayError, RelayResult};

/// The relay server instance.
pub struct RelayServer {
    router: Arc<ChannelRouter>,
    /// Flipped to `true` once on shutdown. Sessions opened afterwards see it
    /// immediately.
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    pub fn new(router: Arc<ChannelRouter>) -> Self {
        Self {
            router,
            shutdown_tx: watch::channel(false).0,
        }
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    /// Bind `bind:port` and start relaying.
    ///
    /// Configuration is checked before anything is bound or mutated. Calling
    /// this again while listening is a no-op.
    pub async fn listen(
        &self,
        bind: IpAddr,
        port: u16,
        key: &str,
    ) -> RelayResult<ListenOutcome> {
        if port == 0 {
            return Err(RelayError::InvalidConfiguration(
                "a non-zero port is required".into(),
            ));
        }
        if key.is_empty() {
            return Err(RelayError::InvalidConfiguration(
                "a non-empty shared key is required".into(),
            ));
        }
        if self.router.is_listening().await {
            debug!("listen called while already listening");
            return Ok(ListenOutcome::AlreadyListening);
        }

        let addr = SocketAddr::new(bind, port);
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {addr} failed: {e}")))?;

        self.serve(tcp_listener, key).await
    }

    /// Start relaying on an already-bound listener.
    pub async fn serve(
        &self,
        tcp_listener: TcpListener,
        key: &str,
    ) -> RelayResult<ListenOutcome> {
        let local_addr = tcp_listener.local_addr()?;

        if self.router.listen(key).await? == ListenOutcome::AlreadyListening {
            return Ok(ListenOutcome::AlreadyListening);
        }

        let conn_rx = websocket::start_listener(tcp_listener);
        tokio::spawn(accept_connections(
            self.router.clone(),
            self.shutdown_tx.subscribe(),
            conn_rx,
        ));

        let mode = self.router.mode().await;
        info!(addr = %local_addr, mode = %mode, "relay listening on ws://{local_addr}");
        Ok(ListenOutcome::Started)
    }

    /// Ask every open session to close its socket.
    pub fn shutdown(&self) {
        info!("broadcasting shutdown to connected clients");
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_connections(
    router: Arc<ChannelRouter>,
    shutdown_rx: watch::Receiver<bool>,
    mut conn_rx: mpsc::Receiver<WebSocketConnection>,
) {
    while let Some(conn) = conn_rx.recv().await {
        let router = router.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            session_loop(router, conn, shutdown_rx).await;
        });
    }
    info!("listener closed");
}

/// Drive one connection until the peer leaves or the server shuts down.
///
/// Inbound frames go through the router one at a time; the session's outbound
/// queue is drained to the socket in between.
async fn session_loop(
    router: Arc<ChannelRouter>,
    mut conn: WebSocketConnection,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let id = router.allocate_session_id();
    let remote = conn.remote_addr;
    let (session, mut outbound_rx) = PeerSession::new(id);
    let peer: Arc<dyn PeerSink> = Arc::new(session);

    info!(session = %id, remote = %remote, "session opened");

    loop {
        tokio::select! {
            true = async { shutdown_rx.wait_for(|stopping| *stopping).await.is_ok() } => {
                debug!(session = %id, "shutdown signal received, closing socket");
                websocket::ws_close(&mut conn.ws_stream).await;
                break;
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = websocket::ws_send_text(&mut conn.ws_stream, &frame).await {
                    debug!(session = %id, error = %e, "write failed, ending session");
                    break;
                }
            }

            inbound = websocket::ws_recv_payload(&mut conn.ws_stream) => {
                match inbound {
                    Ok(Some(data)) => {
                        let outcome = router.on_inbound_message(&peer, &data).await;
                        debug!(session = %id, ?outcome, "frame handled");
                    }
                    Ok(None) => {
                        debug!(session = %id, "peer closed");
                        break;
                    }
                    Err(e) => {
                        warn!(session = %id, error = %e, "session ended with transport error");
                        break;
                    }
                }
            }
        }
    }

    router.on_session_closed(id).await;
    info!(session = %id, remote = %remote, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // Compile-time check: the connection future must be spawnable on the
    // multi-threaded runtime.
    #[allow(dead_code)]
    fn session_future_is_send(
        router: Arc<ChannelRouter>,
        conn: WebSocketConnection,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        assert_send(&session_loop(router, conn, shutdown_rx));
    }

    #[tokio::test]
    async fn shutdown_flag_is_sticky_for_late_sessions() {
        let server = RelayServer::new(Arc::new(ChannelRouter::new()));
        let mut late_rx = server.shutdown_tx.subscribe();
        server.shutdown();

        let stopping = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            async { late_rx.wait_for(|stopping| *stopping).await.is_ok() },
        )
        .await
        .unwrap();
        assert!(stopping);
    }
}
