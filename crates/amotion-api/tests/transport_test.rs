#![allow(clippy::unwrap_used)]
// Integration tests for `TransportChannel` against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use amotion_api::{Error, LinkState, ReconnectConfig, TransportChannel, TransportEvent};

// ── Helpers ─────────────────────────────────────────────────────────

async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{addr}/api/ws")).unwrap();
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        send_wait: Duration::from_secs(5),
        ..ReconnectConfig::default()
    }
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event stream ended")
}

// ── Frame flow ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_then_exchange_frames() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let mut server = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 1 });

    server
        .send(Message::Text(r#"{"event":"ui_info","args":{},"type":"event"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Frame(r#"{"event":"ui_info","args":{},"type":"event"}"#.into())
    );

    channel
        .send(r#"{"endpoint":"time","args":null,"id":1}"#.into())
        .await
        .unwrap();
    let received = server.next().await.unwrap().unwrap();
    assert_eq!(
        received.into_text().unwrap().as_str(),
        r#"{"endpoint":"time","args":null,"id":1}"#
    );

    channel.shutdown();
}

#[tokio::test]
async fn test_binary_frames_are_decoded_as_text() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let mut server = accept(&listener).await;
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected { .. }));

    server
        .send(Message::Binary(vec![0xff, 0xfe].into()))
        .await
        .unwrap();
    server
        .send(Message::Binary(br#"{"id":2}"#.to_vec().into()))
        .await
        .unwrap();

    // The undecodable frame is dropped, the valid one comes through.
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Frame(r#"{"id":2}"#.into())
    );

    channel.shutdown();
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnect_after_server_close() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let mut first = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 1 });

    first.close(None).await.unwrap();
    drop(first);

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { epoch: 1, .. }
    ));

    let _second = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 2 });
    assert!(channel.is_connected());

    channel.shutdown();
}

#[tokio::test]
async fn test_force_reconnect_starts_new_epoch() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let _first = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 1 });

    channel.force_reconnect();
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { epoch: 1, .. }
    ));

    let _second = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 2 });

    channel.shutdown();
}

#[tokio::test]
async fn test_rejected_connections_back_off() {
    let (listener, url) = listen().await;
    let config = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(400),
        ..fast_reconnect()
    };
    let (channel, mut events) = TransportChannel::start(url, config, CancellationToken::new());

    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            held.push(accept(&listener).await);
        }
    });

    let started = tokio::time::Instant::now();
    let mut connections = 0;
    while connections < 5 {
        if let TransportEvent::Connected { epoch } = next_event(&mut events).await {
            connections += 1;
            if connections < 5 {
                channel.reject(epoch);
            }
        }
    }

    // 50 + 100 + 200 + 400 ms between the five connections.
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(700),
        "rejected connections reconnected too fast: {elapsed:?}"
    );

    channel.shutdown();
    server.abort();
}

#[tokio::test]
async fn test_reject_ignores_replaced_connections() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let mut server = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 1 });

    channel.reject(7);
    channel.send_on(1, r#"{"id":1}"#.into()).await.unwrap();
    let received = server.next().await.unwrap().unwrap();
    assert_eq!(received.into_text().unwrap().as_str(), r#"{"id":1}"#);
    assert!(channel.is_connected());

    channel.shutdown();
}

// ── Connection-bound sends ──────────────────────────────────────────

#[tokio::test]
async fn test_send_on_refuses_a_replaced_connection() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let _first = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 1 });

    channel.force_reconnect();
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected { epoch: 1, .. }
    ));

    // Queued while the link is down, bound to the old connection.
    let stale = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.send_on(1, r#"{"id":17}"#.into()).await })
    };

    let mut second = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected { epoch: 2 });

    let result = stale.await.unwrap();
    assert!(
        matches!(result, Err(Error::ConnectionLost)),
        "expected ConnectionLost, got: {result:?}"
    );

    channel.send_on(2, r#"{"id":1}"#.into()).await.unwrap();
    let received = second.next().await.unwrap().unwrap();
    assert_eq!(received.into_text().unwrap().as_str(), r#"{"id":1}"#);

    channel.shutdown();
}

// ── Sending without a link ──────────────────────────────────────────

#[tokio::test]
async fn test_send_waits_for_connection() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let sender = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.send(r#"{"id":1}"#.into()).await })
    };

    let mut server = accept(&listener).await;
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected { .. }));

    sender.await.unwrap().unwrap();
    let received = server.next().await.unwrap().unwrap();
    assert_eq!(received.into_text().unwrap().as_str(), r#"{"id":1}"#);

    channel.shutdown();
}

#[tokio::test]
async fn test_send_times_out_without_connection() {
    // Bind then drop so the port refuses connections.
    let (listener, url) = listen().await;
    drop(listener);

    let config = ReconnectConfig {
        send_wait: Duration::from_millis(150),
        ..fast_reconnect()
    };
    let (channel, _events) = TransportChannel::start(url, config, CancellationToken::new());

    let result = channel.send(r#"{"id":1}"#.into()).await;
    assert!(
        matches!(result, Err(Error::Timeout { .. })),
        "expected Timeout, got: {result:?}"
    );

    channel.shutdown();
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_stream_and_rejects_sends() {
    let (listener, url) = listen().await;
    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    let mut server = accept(&listener).await;
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected { .. }));

    channel.shutdown();
    tokio::time::timeout(Duration::from_secs(5), channel.closed())
        .await
        .unwrap();
    assert_eq!(*channel.state().borrow(), LinkState::Closing);

    // The server sees the close frame.
    let frame = server.next().await;
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    // The event stream ends.
    let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert!(end.is_none());

    assert!(matches!(
        channel.send(r#"{"id":1}"#.into()).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_parent_token_cancellation_stops_the_loop() {
    let (listener, url) = listen().await;
    drop(listener);

    let cancel = CancellationToken::new();
    let (channel, _events) = TransportChannel::start(url, fast_reconnect(), cancel.clone());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), channel.closed())
        .await
        .unwrap();
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_connect_failures_are_reported() {
    let (listener, url) = listen().await;
    drop(listener);

    let (channel, mut events) =
        TransportChannel::start(url, fast_reconnect(), CancellationToken::new());

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectFailed { attempt: 0, .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectFailed { attempt: 1, .. }
    ));

    channel.shutdown();
}
