use std::io;

use session_registry::{RegistryError, SessionId};

/// Everything that can go wrong inside the relay.
///
/// Only `Bind` and `Console` end the process; every other variant is
/// contained to one session or one operator action.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("receive failed on {id}: {source}")]
    Receive {
        id: SessionId,
        #[source]
        source: io::Error,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("invalid selection: {0}")]
    InvalidOperatorInput(String),

    #[error("send to {id} failed: {source}")]
    Send {
        id: SessionId,
        #[source]
        source: io::Error,
    },

    #[error("operator console failed: {0}")]
    Console(#[source] io::Error),
}

impl From<RegistryError> for RelayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SessionNotFound(id) => RelayError::SessionNotFound(id),
        }
    }
}
