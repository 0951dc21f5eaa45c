use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Runtime configuration for the relay.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Interface to listen on
    pub host: String,
    /// TCP port to listen on (0 picks a free port)
    pub port: u16,
    /// How often the dispatch loop re-checks the session list
    pub poll_interval: Duration,
    /// Largest chunk a session reader pulls off the socket at once
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RelayConfig {
    /// Address string handed to the listener. Bare IPv6 hosts get bracketed.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
