//! End-to-end relay tests: a real listener on loopback, real peers, and a
//! scripted operator driving the dispatch loop.

use std::time::Duration;

use session_registry::SessionId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::RelayConfig;
use crate::console::OperatorInput;
use crate::dispatch::Tick;
use crate::events::{EventReceiver, RelayEvent};
use crate::server::Relay;
use crate::test_helpers::{TEST_TIMEOUT, next_event, wait_until};

fn test_config() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn start_relay() -> (Relay, EventReceiver) {
    let mut relay = Relay::start(test_config())
        .await
        .expect("failed to start relay");
    let events = relay.take_events().expect("events already taken");
    (relay, events)
}

/// Connect a peer and wait until the relay has registered it
async fn connect_peer(relay: &Relay) -> (TcpStream, SessionId) {
    let peer = TcpStream::connect(relay.local_addr()).await.unwrap();
    let id = SessionId::from_peer(peer.local_addr().unwrap());
    let registry = relay.registry();
    let wanted = id.clone();
    wait_until(|| {
        let registry = registry.clone();
        let wanted = wanted.clone();
        async move { registry.contains(&wanted).await }
    })
    .await;
    (peer, id)
}

/// Skip lifecycle events until the next output event
async fn next_output(rx: &mut EventReceiver) -> (SessionId, String) {
    loop {
        if let RelayEvent::Output { id, text } = next_event(rx).await {
            return (id, text);
        }
    }
}

/// Skip events until the next one that belongs to `id`
async fn next_event_for(rx: &mut EventReceiver, id: &SessionId) -> RelayEvent {
    loop {
        let event = next_event(rx).await;
        if event.id() == id {
            return event;
        }
    }
}

fn scripted(lines: &[&str]) -> OperatorInput {
    let (tx, rx) = mpsc::channel(lines.len().max(1));
    for line in lines {
        tx.try_send(line.to_string()).unwrap();
    }
    OperatorInput::new(rx)
}

#[tokio::test]
async fn single_peer_is_registered_and_its_text_is_tagged() {
    let (relay, mut events) = start_relay().await;
    let (mut peer, id) = connect_peer(&relay).await;

    let snapshot = relay.registry().snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get(0), Some(&id));

    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Connected { id: id.clone() }
    );

    peer.write_all(b"hello").await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event.to_string(), format!("[{}] hello", id));

    relay.shutdown().await;
}

#[tokio::test]
async fn peer_output_keeps_receipt_order() {
    let (relay, mut events) = start_relay().await;
    let (mut peer, id) = connect_peer(&relay).await;

    let mut expected = String::new();
    for n in 0..20 {
        let line = format!("line {}\n", n);
        peer.write_all(line.as_bytes()).await.unwrap();
        expected.push_str(&line);
    }

    let mut received = String::new();
    while received.len() < expected.len() {
        let (from, text) = next_output(&mut events).await;
        assert_eq!(from, id);
        received.push_str(&text);
    }
    assert_eq!(received, expected);

    relay.shutdown().await;
}

#[tokio::test]
async fn operator_command_reaches_only_the_selected_peer() {
    let (relay, _events) = start_relay().await;
    let (mut peer_a, _id_a) = connect_peer(&relay).await;
    let (mut peer_b, id_b) = connect_peer(&relay).await;

    let mut dispatch = relay.dispatch_loop(scripted(&["1", "ping"]), Vec::<u8>::new());
    match dispatch.tick().await.unwrap() {
        Tick::Sent { id, .. } => assert_eq!(id, id_b),
        other => panic!("expected send, got {:?}", other),
    }

    let mut buf = [0u8; 64];
    let n = timeout(TEST_TIMEOUT, peer_b.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"ping");

    assert!(
        timeout(Duration::from_millis(100), peer_a.read(&mut buf))
            .await
            .is_err(),
        "peer A should receive nothing"
    );

    let listing = String::from_utf8_lossy(dispatch.output()).into_owned();
    assert!(listing.contains(&format!("  [1] {}\n", id_b)));
    assert_eq!(relay.metrics().snapshot().commands_sent, 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn disconnect_removes_session_and_next_listing_omits_it() {
    let (relay, mut events) = start_relay().await;
    let (peer_a, id_a) = connect_peer(&relay).await;
    let (_peer_b, id_b) = connect_peer(&relay).await;

    let mut dispatch = relay.dispatch_loop(scripted(&[""]), Vec::<u8>::new());
    assert!(matches!(dispatch.tick().await.unwrap(), Tick::Skipped));

    drop(peer_a);
    let registry = relay.registry();
    let gone = id_a.clone();
    wait_until(|| {
        let registry = registry.clone();
        let gone = gone.clone();
        async move { !registry.contains(&gone).await }
    })
    .await;

    // A's connect event was never consumed, so its disconnect follows it
    assert_eq!(
        next_event_for(&mut events, &id_a).await,
        RelayEvent::Connected { id: id_a.clone() }
    );
    assert_eq!(
        next_event_for(&mut events, &id_a).await,
        RelayEvent::Disconnected {
            id: id_a.clone(),
            reason: None
        }
    );

    // Input is exhausted, so the iteration re-renders and then stops at the prompt
    assert!(matches!(dispatch.tick().await.unwrap(), Tick::InputClosed));
    let out = String::from_utf8_lossy(dispatch.output()).into_owned();
    let latest = &out[out.rfind("Connected sessions:").unwrap()..];
    assert!(!latest.contains(id_a.as_str()));
    assert!(latest.contains(&format!("  [0] {}\n", id_b)));
    assert_eq!(relay.registry().len().await, 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn registry_tracks_many_concurrent_peers() {
    let (relay, _events) = start_relay().await;

    let mut peers = Vec::new();
    for _ in 0..16 {
        peers.push(TcpStream::connect(relay.local_addr()).await.unwrap());
    }

    let registry = relay.registry();
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.len().await == 16 }
    })
    .await;

    peers.truncate(6);
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.len().await == 6 }
    })
    .await;
    assert_eq!(relay.metrics().snapshot().active_sessions, 6);

    relay.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_peers_and_empties_registry() {
    let (relay, mut events) = start_relay().await;
    let (mut peer_a, _id_a) = connect_peer(&relay).await;
    let (mut peer_b, _id_b) = connect_peer(&relay).await;
    let registry = relay.registry();
    let addr = relay.local_addr();

    let stats = timeout(TEST_TIMEOUT, relay.shutdown()).await.unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.active_sessions, 0);
    assert!(registry.is_empty().await);

    let mut buf = [0u8; 8];
    assert_eq!(peer_a.read(&mut buf).await.unwrap(), 0);
    assert_eq!(peer_b.read(&mut buf).await.unwrap(), 0);
    assert!(TcpStream::connect(addr).await.is_err());

    // Event stream ends once the relay is gone
    let mut remaining = 0;
    while timeout(TEST_TIMEOUT, events.recv()).await.unwrap().is_some() {
        remaining += 1;
    }
    assert_eq!(remaining, 4, "two connects and two disconnects");
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let (relay, _events) = start_relay().await;
    let taken = relay.local_addr();

    let config = RelayConfig {
        host: taken.ip().to_string(),
        port: taken.port(),
        ..test_config()
    };
    assert!(matches!(
        Relay::start(config).await,
        Err(crate::error::RelayError::Bind { .. })
    ));

    relay.shutdown().await;
}
