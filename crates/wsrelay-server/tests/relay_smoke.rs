//! End-to-end tests: a real relay on an ephemeral port, driven by
//! `wsrelay-client` and by raw WebSocket frames.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use wsrelay_client::{ClientEvent, ConnectConfig, RelayClient};
use wsrelay_core::{ChannelMode, ErrorCode, RelayError};
use wsrelay_server::{ChannelRouter, ListenOutcome, RelayServer};

const KEY: &str = "c2VjcmV0";

async fn start_relay(mode: ChannelMode) -> (RelayServer, String) {
    let router = Arc::new(ChannelRouter::with_mode(mode));
    let server = RelayServer::new(router);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    assert_eq!(
        server.serve(listener, KEY).await.unwrap(),
        ListenOutcome::Started
    );
    (server, format!("ws://{addr}"))
}

async fn connect(url: &str, mode: ChannelMode, key: &str) -> RelayClient {
    RelayClient::connect(
        url,
        ConnectConfig {
            mode,
            key: key.into(),
            timeout_secs: 5,
        },
    )
    .await
    .unwrap()
}

/// Poll until `check` holds or give up after two seconds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn multi_channel_fan_out() {
    let (server, url) = start_relay(ChannelMode::default()).await;
    let router: &ChannelRouter = server.router();

    let bob = connect(&url, ChannelMode::default(), KEY).await;
    let amy = connect(&url, ChannelMode::default(), KEY).await;
    let mut bob_events = bob.subscribe();
    let mut amy_events = amy.subscribe();

    assert_eq!(bob.send("hi", "bob").await.unwrap(), 3);
    eventually(|| async move { router.subscriber_count(3).await == 1 }).await;
    let last = router.get_last_message(3).await.unwrap();
    assert_eq!((last.alias.as_str(), last.content.as_str()), ("bob", "hi"));

    // Same alias length, same channel.
    amy.send("hey", "amy").await.unwrap();
    match next_event(&mut bob_events).await {
        ClientEvent::Message(msg) => {
            assert_eq!(msg.channel, 3);
            assert_eq!(msg.alias, "amy");
            assert_eq!(msg.content, "hey");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    eventually(|| async move { router.subscriber_count(3).await == 2 }).await;

    // Now both are subscribed, including the sender itself.
    bob.send("welcome", "bob").await.unwrap();
    for events in [&mut bob_events, &mut amy_events] {
        match next_event(events).await {
            ClientEvent::Message(msg) => assert_eq!(msg.content, "welcome"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(bob.receive(Some(3)).await.unwrap().content, "welcome");
    assert_eq!(amy.receive(Some(3)).await.unwrap().alias, "bob");
    assert_eq!(amy.receive(Some(4)).await, None);

    bob.disconnect().await.unwrap();
    assert!(matches!(bob.disconnect().await, Err(RelayError::NotConnected)));
    eventually(|| async move { router.subscriber_count(3).await == 1 }).await;
}

#[tokio::test]
async fn wrong_key_is_rejected_to_sender_only() {
    let (server, url) = start_relay(ChannelMode::Single).await;
    let router: &ChannelRouter = server.router();

    let good = connect(&url, ChannelMode::Single, KEY).await;
    let eve = connect(&url, ChannelMode::Single, "not-the-key").await;
    let mut good_events = good.subscribe();
    let mut eve_events = eve.subscribe();

    good.send("hello", "good").await.unwrap();
    eventually(|| async move { router.subscriber_count(0).await == 1 }).await;

    eve.send("let me in", "eve").await.unwrap();
    match next_event(&mut eve_events).await {
        ClientEvent::Rejected { code, .. } => assert_eq!(code, ErrorCode::AuthMismatch),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        eve.last_rejection().await.map(|r| r.0),
        Some(ErrorCode::AuthMismatch)
    );
    assert_eq!(router.get_last_message(0).await.unwrap().content, "hello");

    // The good client saw nothing.
    assert!(tokio::time::timeout(Duration::from_millis(100), good_events.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn paused_relay_keeps_connection_open() {
    let (server, url) = start_relay(ChannelMode::default()).await;
    let router: &ChannelRouter = server.router();

    let bob = connect(&url, ChannelMode::default(), KEY).await;
    let mut events = bob.subscribe();

    router.pause().await;
    bob.send("hi", "bob").await.unwrap();
    match next_event(&mut events).await {
        ClientEvent::Rejected { code, .. } => assert_eq!(code, ErrorCode::ServerPaused),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(router.get_last_message(3).await, None);
    assert!(bob.is_connected());

    router.resume().await;
    bob.send("hi", "bob").await.unwrap();
    eventually(|| async move { router.get_last_message(3).await.is_some() }).await;
}

#[tokio::test]
async fn malformed_frame_gets_error_and_socket_stays_open() {
    let (server, url) = start_relay(ChannelMode::default()).await;
    let router: &ChannelRouter = server.router();

    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["code"], "MalformedPayload");
    assert!(value["message"].as_str().is_some());

    // Binary frames are accepted too, on the same socket.
    let frame = format!(r#"{{"type":"send","key":"{KEY}","content":"hi","alias":"bob"}}"#);
    ws.send(Message::Binary(frame.into_bytes())).await.unwrap();
    eventually(|| async move { router.get_last_message(3).await.is_some() }).await;
    assert_eq!(router.stats().await.subscriptions, 1);

    ws.close(None).await.unwrap();
    eventually(|| async move { router.stats().await.subscriptions == 0 }).await;
}

#[tokio::test]
async fn listen_twice_is_a_no_op() {
    let (server, _url) = start_relay(ChannelMode::default()).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    assert_eq!(
        server.serve(listener, KEY).await.unwrap(),
        ListenOutcome::AlreadyListening
    );
    assert_eq!(
        server
            .listen("127.0.0.1".parse().unwrap(), 1, KEY)
            .await
            .unwrap(),
        ListenOutcome::AlreadyListening
    );
}

#[tokio::test]
async fn listen_validates_before_binding() {
    let router = Arc::new(ChannelRouter::new());
    let server = RelayServer::new(router.clone());
    let localhost = "127.0.0.1".parse().unwrap();

    assert!(matches!(
        server.listen(localhost, 0, KEY).await,
        Err(RelayError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        server.listen(localhost, 3000, "").await,
        Err(RelayError::InvalidConfiguration(_))
    ));
    assert!(!router.is_listening().await);
}

#[tokio::test]
async fn programmatic_publish_reaches_subscribers() {
    let (server, url) = start_relay(ChannelMode::default()).await;
    let router: &ChannelRouter = server.router();

    let bob = connect(&url, ChannelMode::default(), KEY).await;
    let mut events = bob.subscribe();
    bob.send("hi", "bob").await.unwrap();
    eventually(|| async move { router.subscriber_count(3).await == 1 }).await;

    let report = router.publish(3, "ops", "restart soon").await.unwrap();
    assert_eq!(report.delivered, 1);
    match next_event(&mut events).await {
        // Cached under the alias-derived channel, like any other deliver.
        ClientEvent::Message(msg) => {
            assert_eq!(msg.alias, "ops");
            assert_eq!(msg.content, "restart soon");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_closes_client_sockets() {
    let (server, url) = start_relay(ChannelMode::default()).await;
    let bob = connect(&url, ChannelMode::default(), KEY).await;
    let mut events = bob.subscribe();

    server.shutdown();
    assert_eq!(next_event(&mut events).await, ClientEvent::Closed);
    assert!(!bob.is_connected());
}
