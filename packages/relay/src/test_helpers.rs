//! Shared fixtures for relay tests: loopback socket pairs and bounded waits.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::events::{EventReceiver, RelayEvent};

/// Upper bound for any single wait in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected loopback pair: (accepted server side, client side)
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (accepted.unwrap().0, client.unwrap())
}

pub async fn next_event(rx: &mut EventReceiver) -> RelayEvent {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("event channel closed")
}

/// Poll `check` until it returns true or the test timeout elapses.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(TEST_TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached before timeout");
}
