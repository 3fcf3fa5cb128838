//! STOMP publish/subscribe broker.
//!
//! Clients connect over TCP, authenticate with CONNECT, subscribe to named
//! topics and publish text messages that are fanned out to every current
//! subscriber of the topic.
//!
//! # Architecture
//!
//! ```text
//!   socket ──> FrameDecoder ──> ProtocolEngine ──> Broker
//!                                     │              ├─ SessionDirectory
//!                                     │              ├─ TopicRegistry
//!                                     │              └─ ConnectionRegistry
//!   socket <── writer <── ClientHandle queue <─────────┘
//! ```
//!
//! # Components
//!
//! - [`Broker`]: shared state, passed explicitly to every engine
//! - [`ProtocolEngine`]: per-connection state machine (one per socket)
//! - [`TopicRegistry`]: topics, their ordered subscribers and message ids
//! - [`ConnectionRegistry`]: connection id → outbound [`ClientHandle`]
//! - [`SessionDirectory`]: credentials and the active-login table
//! - [`ThreadPerClient`] / [`Reactor`]: the two TCP transports

#![forbid(unsafe_code)]

mod broker;
mod config;
mod engine;
mod error;
mod registry;
mod session;
mod topic;
mod transport;

use std::sync::Arc;

pub use broker::Broker;
pub use config::{BrokerConfig, DEFAULT_PORT, DEFAULT_SERVER_ID, ServerConfig, TransportMode};
pub use engine::{EngineState, ProtocolEngine};
pub use error::{EngineError, ServerError};
pub use registry::{ClientHandle, ConnectionRegistry, Delivery, PublishError};
pub use session::{LoginError, LoginOutcome, SessionDirectory};
pub use topic::{Subscriber, Topic, TopicRegistry};
pub use transport::{Reactor, ThreadPerClient};

/// Production broker server.
///
/// Owns the broker context and runs it behind the transport selected by
/// [`ServerConfig::mode`].
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    broker: Arc<Broker>,
}

impl Server {
    /// Create a server with an empty broker.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` if the configuration is unusable.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let broker = Arc::new(Broker::new(config.broker.clone()));
        Ok(Self { config, broker })
    }

    /// Shared broker state.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and serve until the listener fails.
    ///
    /// Blocks the calling thread. The reactor mode builds its own
    /// multi-threaded runtime, so this must not be called from inside one.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if binding or runtime construction fails.
    pub fn run(self) -> Result<(), ServerError> {
        let address = self.config.bind_address();
        let max_frame_size = self.config.max_frame_size;

        tracing::info!(
            mode = %self.config.mode,
            server_id = %self.config.broker.server_id,
            "Server starting on {}",
            address
        );

        match self.config.mode {
            TransportMode::Tpc => {
                ThreadPerClient::bind(&address, self.broker, max_frame_size)?.serve()
            },
            TransportMode::Reactor => {
                let worker_threads = self.config.worker_threads();
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(worker_threads)
                    .thread_name("stomp-reactor")
                    .enable_all()
                    .build()
                    .map_err(|e| ServerError::Transport(format!("failed to build runtime: {e}")))?;

                tracing::info!(worker_threads, "reactor runtime started");

                runtime.block_on(async move {
                    Reactor::bind(&address, self.broker, max_frame_size).await?.serve().await
                })
            },
        }
    }
}

/// Run a server with `config`, blocking the calling thread.
///
/// # Errors
///
/// See [`Server::new`] and [`Server::run`].
pub fn run(config: ServerConfig) -> Result<(), ServerError> {
    Server::new(config)?.run()
}
