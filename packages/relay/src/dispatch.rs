//! Operator dispatch loop.
//!
//! Polls the registry, re-renders the session list when membership changes,
//! and forwards one operator command per iteration to the chosen session.
//! The index the operator types always refers to the list taken at the start
//! of the same iteration; if that session vanished in between, the send fails
//! and is reported rather than redirected.

use std::sync::Arc;
use std::time::Duration;

use session_registry::{SessionId, Snapshot};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::console::OperatorInput;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::session::Registry;

const SELECT_PROMPT: &str = "\nSelect session (index, ENTER to skip): ";

/// What one iteration did
#[derive(Debug)]
pub enum Tick {
    /// No sessions, nothing asked
    Idle,
    /// Operator pressed ENTER
    Skipped,
    /// Command delivered
    Sent { id: SessionId, bytes: usize },
    /// Operator action failed; already reported on the console
    Failed(RelayError),
    /// Operator input ended
    InputClosed,
}

pub struct DispatchLoop<W> {
    registry: Arc<Registry>,
    metrics: Arc<RelayMetrics>,
    input: OperatorInput,
    output: W,
    poll_interval: Duration,
    last_snapshot: Snapshot,
}

impl<W> DispatchLoop<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<RelayMetrics>,
        input: OperatorInput,
        output: W,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            input,
            output,
            poll_interval,
            last_snapshot: Snapshot::default(),
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Run until cancelled or until operator input ends.
    ///
    /// Only a broken console is returned as an error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), RelayError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let tick = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                tick = self.tick() => tick?,
            };

            match tick {
                Tick::InputClosed => {
                    info!("operator input closed");
                    return Ok(());
                }
                Tick::Sent { id, bytes } => debug!(session = %id, bytes, "command sent"),
                Tick::Failed(e) => debug!("operator action failed: {}", e),
                Tick::Idle | Tick::Skipped => {}
            }
        }
    }

    /// One iteration without the poll delay
    pub async fn tick(&mut self) -> Result<Tick, RelayError> {
        let snapshot = self.registry.snapshot().await;
        if snapshot != self.last_snapshot {
            self.render(&snapshot).await?;
            self.last_snapshot = snapshot.clone();
        }

        if snapshot.is_empty() {
            return Ok(Tick::Idle);
        }

        self.write(SELECT_PROMPT).await?;
        let Some(choice) = self.input.next_line().await else {
            return Ok(Tick::InputClosed);
        };
        let choice = choice.trim();
        if choice.is_empty() {
            return Ok(Tick::Skipped);
        }

        let id = match select(&snapshot, choice) {
            Ok(id) => id,
            Err(e) => return self.report(e).await,
        };

        self.write(&format!("Command for {}: ", id)).await?;
        let Some(command) = self.input.next_line().await else {
            return Ok(Tick::InputClosed);
        };

        match self.send(&id, command.as_bytes()).await {
            Ok(()) => Ok(Tick::Sent {
                id,
                bytes: command.len(),
            }),
            Err(e) => {
                self.metrics.send_failed();
                self.report(e).await
            }
        }
    }

    async fn render(&mut self, snapshot: &Snapshot) -> Result<(), RelayError> {
        let mut listing = String::from("\nConnected sessions:\n");
        if snapshot.is_empty() {
            listing.push_str("  No sessions connected.\n");
        } else {
            for (index, id) in snapshot.iter().enumerate() {
                listing.push_str(&format!("  [{}] {}\n", index, id));
            }
        }
        self.write(&listing).await
    }

    /// Look up the session and write the payload outside the registry lock
    async fn send(&self, id: &SessionId, payload: &[u8]) -> Result<(), RelayError> {
        let handle = self.registry.get(id).await?;
        handle
            .send(payload)
            .await
            .map_err(|source| RelayError::Send {
                id: id.clone(),
                source,
            })?;
        self.metrics.command_sent(payload.len());
        Ok(())
    }

    async fn report(&mut self, err: RelayError) -> Result<Tick, RelayError> {
        self.write(&format!("[!] {}\n", err)).await?;
        Ok(Tick::Failed(err))
    }

    async fn write(&mut self, text: &str) -> Result<(), RelayError> {
        self.output
            .write_all(text.as_bytes())
            .await
            .map_err(RelayError::Console)?;
        self.output.flush().await.map_err(RelayError::Console)
    }
}

/// Map the operator's choice onto this iteration's snapshot
fn select(snapshot: &Snapshot, choice: &str) -> Result<SessionId, RelayError> {
    let index: usize = choice.parse().map_err(|_| {
        RelayError::InvalidOperatorInput(format!("'{}' is not a session index", choice))
    })?;
    snapshot.get(index).cloned().ok_or_else(|| {
        RelayError::InvalidOperatorInput(format!(
            "no session at index {} ({} connected)",
            index,
            snapshot.len()
        ))
    })
}
