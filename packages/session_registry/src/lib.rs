//! Session Registry - the authoritative map of live relay sessions
//!
//! This crate tracks which remote peers are currently connected and hands out
//! the handle used to write to each one. It knows nothing about sockets: the
//! handle type is a generic parameter, so the relay stores its write halves
//! here while tests can use plain values.
//!
//! # Example
//!
//! ```
//! use session_registry::{SessionId, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SessionRegistry::new();
//!     let id = SessionId::from_peer("10.0.0.7:40122".parse().unwrap());
//!
//!     let registration = registry.insert(id.clone(), "handle").await;
//!     assert!(registration.displaced.is_none());
//!
//!     let snapshot = registry.snapshot().await;
//!     assert_eq!(snapshot.get(0), Some(&id));
//!
//!     assert_eq!(registry.get(&id).await.unwrap(), "handle");
//!     registry.remove_generation(&id, registration.generation).await;
//!     assert!(registry.is_empty().await);
//! }
//! ```

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{Generation, Registration, SessionId, SessionRegistry, Snapshot};
