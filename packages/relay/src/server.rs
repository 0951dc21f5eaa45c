//! Relay supervisor: wires registry, listener, readers and the event stream
//! together and owns their shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::console::OperatorInput;
use crate::dispatch::DispatchLoop;
use crate::error::RelayError;
use crate::events::{EventReceiver, event_channel};
use crate::listener::Listener;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::session::{Registry, RelayContext};

/// A running relay.
pub struct Relay {
    config: RelayConfig,
    local_addr: SocketAddr,
    ctx: Arc<RelayContext>,
    events: Option<EventReceiver>,
    cancel: CancellationToken,
    listener_task: JoinHandle<()>,
}

impl Relay {
    /// Bind the listener and start accepting sessions in the background.
    pub async fn start(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = Listener::bind(&config.bind_addr()).await?;
        let local_addr = listener.local_addr();

        let (events_tx, events_rx) = event_channel();
        let ctx = Arc::new(RelayContext {
            registry: Arc::new(Registry::new()),
            metrics: Arc::new(RelayMetrics::new()),
            events: events_tx,
            chunk_size: config.chunk_size,
        });
        let cancel = CancellationToken::new();

        let listener_task = tokio::spawn(listener.run(ctx.clone(), cancel.clone()));

        info!("relay listening on {}", local_addr);

        Ok(Self {
            config,
            local_addr,
            ctx,
            events: Some(events_rx),
            cancel,
            listener_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.ctx.registry.clone()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.ctx.metrics.clone()
    }

    /// Token that stops the listener, every reader and the dispatch loop
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the operator-facing event stream. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// Build the operator loop over this relay's registry
    pub fn dispatch_loop<W>(&self, input: OperatorInput, output: W) -> DispatchLoop<W>
    where
        W: AsyncWrite + Unpin,
    {
        DispatchLoop::new(
            self.registry(),
            self.metrics(),
            input,
            output,
            self.config.poll_interval,
        )
    }

    /// Stop accepting, stop and join every reader, and close anything left in
    /// the registry. The event stream ends once this returns.
    pub async fn shutdown(self) -> MetricsSnapshot {
        info!("shutting down relay");
        self.cancel.cancel();

        if let Err(e) = self.listener_task.await {
            error!("listener task failed: {}", e);
        }

        for (id, handle) in self.ctx.registry.drain().await {
            info!(session = %id, "closing leftover session");
            handle.close().await;
        }

        let stats = self.ctx.metrics.snapshot();
        info!(
            sessions = stats.total_sessions,
            bytes_received = stats.bytes_received,
            commands_sent = stats.commands_sent,
            uptime_secs = stats.uptime_secs,
            "relay stopped"
        );
        stats
    }
}
