use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::error::RegistryError;

/// Identifier of a relay session, derived from the remote peer as `"<ip>:<port>"`
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Build the id for a connected peer.
    ///
    /// IPv6 addresses are rendered without brackets, so `[::1]:9000` becomes `::1:9000`.
    pub fn from_peer(addr: SocketAddr) -> Self {
        Self(format!("{}:{}", addr.ip(), addr.port()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Marks one particular registration of a session id.
///
/// Two peers can briefly map to the same id; the generation lets the owner of
/// an older registration remove only its own entry.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Generation(u64);

/// Result of inserting a session
#[derive(Debug)]
pub struct Registration<H> {
    pub generation: Generation,
    /// Handle of the entry this insert replaced, if the id was already live
    pub displaced: Option<H>,
}

/// Point-in-time, ordered copy of the registered session ids.
///
/// Order is registration order: the oldest live session is index 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot(Vec<SessionId>);

impl Snapshot {
    pub fn get(&self, index: usize) -> Option<&SessionId> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionId> {
        self.0.iter()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.0.contains(id)
    }
}

impl FromIterator<SessionId> for Snapshot {
    fn from_iter<T: IntoIterator<Item = SessionId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct Entry<H> {
    generation: Generation,
    handle: H,
}

/// Registry of live sessions.
///
/// Every operation takes the same lock for a single map access; no lock is
/// ever held while the caller does I/O on a handle.
pub struct SessionRegistry<H> {
    sessions: Mutex<HashMap<SessionId, Entry<H>>>,
    next_generation: AtomicU64,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> SessionRegistry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Register a session. Last write wins: a live entry with the same id is
    /// replaced and its handle returned in `displaced`.
    pub async fn insert(&self, id: SessionId, handle: H) -> Registration<H> {
        let generation = Generation(self.next_generation.fetch_add(1, Ordering::SeqCst));
        let displaced = self
            .sessions
            .lock()
            .await
            .insert(id, Entry { generation, handle })
            .map(|entry| entry.handle);

        Registration {
            generation,
            displaced,
        }
    }

    /// Remove a session regardless of which registration it belongs to.
    ///
    /// Removing an id that is not registered is a no-op and returns `None`.
    pub async fn remove(&self, id: &SessionId) -> Option<H> {
        self.sessions.lock().await.remove(id).map(|entry| entry.handle)
    }

    /// Remove a session only if it is still the registration identified by `generation`
    pub async fn remove_generation(&self, id: &SessionId, generation: Generation) -> Option<H> {
        let mut sessions = self.sessions.lock().await;
        let current = sessions.get(id).map(|entry| entry.generation);
        if current == Some(generation) {
            sessions.remove(id).map(|entry| entry.handle)
        } else {
            None
        }
    }

    /// Ids of all live sessions in registration order
    pub async fn snapshot(&self) -> Snapshot {
        let sessions = self.sessions.lock().await;
        let mut ordered: Vec<(Generation, &SessionId)> = sessions
            .iter()
            .map(|(id, entry)| (entry.generation, id))
            .collect();
        ordered.sort_unstable_by_key(|(generation, _)| *generation);
        ordered.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Check if a session is registered
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Remove every session (for shutdown), oldest first
    pub async fn drain(&self) -> Vec<(SessionId, H)> {
        let mut drained: Vec<(Generation, SessionId, H)> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(id, entry)| (entry.generation, id, entry.handle))
            .collect();
        drained.sort_unstable_by_key(|(generation, _, _)| *generation);
        drained
            .into_iter()
            .map(|(_, id, handle)| (id, handle))
            .collect()
    }
}

impl<H: Clone> SessionRegistry<H> {
    /// Look up the handle of a live session
    pub async fn get(&self, id: &SessionId) -> Result<H, RegistryError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))
    }
}
