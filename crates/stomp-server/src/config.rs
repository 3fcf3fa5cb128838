//! Broker and server configuration.

use std::fmt;

use stomp_proto::{DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION};

use crate::error::ServerError;

/// Host identifier clients must present in CONNECT.
pub const DEFAULT_SERVER_ID: &str = "stomp.cs.bgu.ac.il";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7777;

/// Protocol-level settings shared by every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Value the CONNECT `host` header must equal
    pub server_id: String,
    /// Value the CONNECT `accept-version` header must equal
    pub protocol_version: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { server_id: DEFAULT_SERVER_ID.to_string(), protocol_version: PROTOCOL_VERSION.to_string() }
    }
}

/// How connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransportMode {
    /// One OS thread per connection with blocking I/O
    #[default]
    Tpc,
    /// Multiplexed event loop shared by all connections
    Reactor,
}

impl TransportMode {
    /// Name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tpc => "tpc",
            Self::Reactor => "reactor",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind to (e.g., "0.0.0.0")
    pub bind_host: String,
    /// TCP port
    pub port: u16,
    /// Connection scheduling strategy
    pub mode: TransportMode,
    /// Largest frame accepted from a client, in bytes
    pub max_frame_size: usize,
    /// Reactor worker threads. `None` uses available parallelism
    pub reactor_threads: Option<usize>,
    /// Protocol settings
    pub broker: BrokerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            mode: TransportMode::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            reactor_threads: None,
            broker: BrokerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Reject settings the transports cannot run with.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` naming the offending setting.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_frame_size == 0 {
            return Err(ServerError::Config("max frame size must be positive".to_string()));
        }
        if self.reactor_threads == Some(0) {
            return Err(ServerError::Config("reactor threads must be positive".to_string()));
        }
        if self.broker.server_id.trim().is_empty() {
            return Err(ServerError::Config("server id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Worker count for the reactor runtime.
    pub fn worker_threads(&self) -> usize {
        self.reactor_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
    }
}
