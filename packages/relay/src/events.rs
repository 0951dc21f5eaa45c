//! Operator-facing event stream.
//!
//! Session readers and the listener report what happens on the wire as
//! `RelayEvent`s; the console printer renders them one per line.

use std::fmt;
use std::io;

use session_registry::SessionId;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    /// A peer connected and was registered
    Connected { id: SessionId },
    /// A chunk of data arrived from a peer, decoded lossily
    Output { id: SessionId, text: String },
    /// A session ended. `reason` is `None` when the peer closed cleanly.
    Disconnected {
        id: SessionId,
        reason: Option<String>,
    },
}

impl RelayEvent {
    pub fn id(&self) -> &SessionId {
        match self {
            RelayEvent::Connected { id }
            | RelayEvent::Output { id, .. }
            | RelayEvent::Disconnected { id, .. } => id,
        }
    }
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Connected { id } => write!(f, "[+] Session connected: {}", id),
            RelayEvent::Output { id, text } => write!(f, "[{}] {}", id, text),
            RelayEvent::Disconnected { id, reason: None } => {
                write!(f, "[-] Session disconnected: {}", id)
            }
            RelayEvent::Disconnected {
                id,
                reason: Some(reason),
            } => write!(f, "[-] Session disconnected: {} ({})", id, reason),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<RelayEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RelayEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Render every event to `out` until all senders are gone.
pub async fn print_events<W>(mut events: EventReceiver, mut out: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        // Leading newline keeps output off the end of a pending prompt
        out.write_all(format!("\n{}\n", event).as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}
