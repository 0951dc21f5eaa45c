//! Per-connection state: the shareable write handle kept in the registry and
//! the reader task that owns the receive side.

use std::io;
use std::sync::Arc;

use session_registry::{Generation, SessionId, SessionRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::events::{EventSender, RelayEvent};
use crate::metrics::RelayMetrics;

/// The registry as used by the relay: session id → write handle
pub type Registry = SessionRegistry<SessionHandle>;

/// Write side of a session's connection, plus the token that stops its reader.
///
/// Cloned out of the registry by the dispatch loop so that writes never
/// happen under the registry lock.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader_cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(writer: OwnedWriteHalf, reader_cancel: CancellationToken) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            reader_cancel,
        }
    }

    /// Write `data` to the peer exactly as given
    pub async fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Stop the session's reader and shut down the write direction. Errors
    /// are ignored: the peer may already be gone.
    pub async fn close(&self) {
        self.reader_cancel.cancel();
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Shared state handed to the listener and every session reader
pub struct RelayContext {
    pub registry: Arc<Registry>,
    pub metrics: Arc<RelayMetrics>,
    pub events: EventSender,
    pub chunk_size: usize,
}

/// How a session reader ended
#[derive(Debug)]
pub enum ReaderExit {
    /// Peer closed its side
    Closed,
    /// Receive failed
    Failed(RelayError),
    /// A newer connection took over the session id
    Replaced,
    /// The relay is shutting down
    Cancelled,
}

impl ReaderExit {
    fn reason(&self) -> Option<String> {
        match self {
            ReaderExit::Closed => None,
            ReaderExit::Failed(e) => Some(e.to_string()),
            ReaderExit::Replaced => Some("replaced by a newer connection".to_string()),
            ReaderExit::Cancelled => Some("relay shutting down".to_string()),
        }
    }
}

/// Drains one connection until it closes, fails, is replaced, or the relay
/// shuts down.
///
/// `cancel` is the session's own token, normally a child of the relay's, and
/// is the same token held by the session's [`SessionHandle`].
pub struct SessionReader {
    id: SessionId,
    generation: Generation,
    reader: OwnedReadHalf,
    ctx: Arc<RelayContext>,
    cancel: CancellationToken,
}

impl SessionReader {
    pub fn new(
        id: SessionId,
        generation: Generation,
        reader: OwnedReadHalf,
        ctx: Arc<RelayContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            generation,
            reader,
            ctx,
            cancel,
        }
    }

    pub async fn run(mut self) -> ReaderExit {
        let exit = self.receive_loop().await;
        self.finish(exit).await
    }

    async fn receive_loop(&mut self) -> ReaderExit {
        let mut buffer = vec![0u8; self.ctx.chunk_size.max(1)];
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return ReaderExit::Cancelled,
                read = self.reader.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => return ReaderExit::Closed,
                Ok(n) => {
                    self.ctx.metrics.received(n);
                    debug!(session = %self.id, bytes = n, "received data");
                    let text = String::from_utf8_lossy(&buffer[..n]).into_owned();
                    let _ = self.ctx.events.send(RelayEvent::Output {
                        id: self.id.clone(),
                        text,
                    });
                }
                Err(source) => {
                    return ReaderExit::Failed(RelayError::Receive {
                        id: self.id.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Same cleanup for every exit path
    async fn finish(self, exit: ReaderExit) -> ReaderExit {
        let Self {
            id,
            generation,
            reader,
            ctx,
            ..
        } = self;

        let owned = ctx.registry.remove_generation(&id, generation).await;
        // Cancelled while the entry already belongs to someone else: displaced
        let exit = match (exit, &owned) {
            (ReaderExit::Cancelled, None) => ReaderExit::Replaced,
            (exit, _) => exit,
        };
        if let Some(handle) = owned {
            handle.close().await;
        }
        drop(reader);

        match &exit {
            ReaderExit::Closed => info!(session = %id, "session closed by peer"),
            ReaderExit::Failed(e) => {
                ctx.metrics.receive_failed();
                warn!(session = %id, "session failed: {}", e);
            }
            ReaderExit::Replaced => info!(session = %id, "session replaced by a newer connection"),
            ReaderExit::Cancelled => debug!(session = %id, "session reader cancelled"),
        }
        ctx.metrics.session_closed();

        let _ = ctx.events.send(RelayEvent::Disconnected {
            id,
            reason: exit.reason(),
        });
        exit
    }
}
