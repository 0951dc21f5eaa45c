use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use session_registry::SessionId;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::events::RelayEvent;
use crate::session::{ReaderExit, RelayContext, SessionHandle, SessionReader};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts peers and turns each one into a registered session with its own reader task.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind the listening socket. Failure here is fatal for the relay.
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        let bind_err = |source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until cancelled, then close the socket and join every reader.
    pub async fn run(self, ctx: Arc<RelayContext>, cancel: CancellationToken) {
        let Self {
            listener,
            local_addr,
        } = self;
        let mut readers: JoinSet<ReaderExit> = JoinSet::new();

        info!("accepting sessions on {}", local_addr);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("accept loop cancelled");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        Self::register(stream, peer, &ctx, &cancel, &mut readers).await;
                    }
                    Err(e) => Self::accept_failed(e, &ctx, &cancel).await,
                },
                Some(joined) = readers.join_next(), if !readers.is_empty() => {
                    if let Err(e) = joined {
                        error!("session reader task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);

        let remaining = readers.len();
        if remaining > 0 {
            debug!("waiting for {} session readers to stop", remaining);
        }
        while let Some(joined) = readers.join_next().await {
            if let Err(e) = joined {
                error!("session reader task failed: {}", e);
            }
        }
        info!("listener stopped");
    }

    /// Record the failure, then back off until the retry delay passes or the
    /// relay shuts down.
    async fn accept_failed(err: io::Error, ctx: &RelayContext, cancel: &CancellationToken) {
        ctx.metrics.accept_failed();
        warn!("{}", RelayError::Accept(err));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
        }
    }

    async fn register(
        stream: TcpStream,
        peer: SocketAddr,
        ctx: &Arc<RelayContext>,
        cancel: &CancellationToken,
        readers: &mut JoinSet<ReaderExit>,
    ) {
        let id = SessionId::from_peer(peer);
        let (read_half, write_half) = stream.into_split();
        let session_cancel = cancel.child_token();

        let registration = ctx
            .registry
            .insert(
                id.clone(),
                SessionHandle::new(write_half, session_cancel.clone()),
            )
            .await;

        if let Some(displaced) = registration.displaced {
            warn!(session = %id, "session id reused, replacing previous connection");
            tokio::spawn(async move { displaced.close().await });
        }

        ctx.metrics.session_opened();
        info!(session = %id, "session connected");
        let _ = ctx.events.send(RelayEvent::Connected { id: id.clone() });

        let reader = SessionReader::new(
            id,
            registration.generation,
            read_half,
            ctx.clone(),
            session_cancel,
        );
        readers.spawn(reader.run());
    }
}
