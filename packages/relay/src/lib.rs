//! Relay - multi-client TCP command relay
//!
//! Accepts any number of TCP peers, tracks each as a session named after its
//! address, streams whatever the peers send to the operator console, and lets
//! the operator pick a session and send it a line of text. Bytes are relayed
//! as-is in both directions; no framing is added.
//!
//! # Example
//!
//! ```no_run
//! use relay::{OperatorInput, Relay, RelayConfig, print_events};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut relay = Relay::start(RelayConfig::default()).await?;
//!
//!     let events = relay.take_events().expect("events not taken yet");
//!     tokio::spawn(print_events(events, tokio::io::stdout()));
//!
//!     let cancel = relay.cancellation_token();
//!     let mut dispatch = relay.dispatch_loop(OperatorInput::stdin(), tokio::io::stdout());
//!     dispatch.run(&cancel).await?;
//!
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod listener;
pub mod metrics;
pub mod server;
pub mod session;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod test_helpers;

pub use config::RelayConfig;
pub use console::OperatorInput;
pub use dispatch::{DispatchLoop, Tick};
pub use error::RelayError;
pub use events::{RelayEvent, print_events};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use server::Relay;
pub use session::{Registry, SessionHandle};
pub use session_registry::{SessionId, Snapshot};
