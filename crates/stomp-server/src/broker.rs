//! Broker context.
//!
//! One [`Broker`] is created at process start and shared by reference with
//! every connection's [`ProtocolEngine`]. It owns all state that outlives a
//! single connection: credentials and active logins, the topic registry, and
//! the connection directory used for delivery.

use std::sync::Arc;

use crate::{
    config::BrokerConfig,
    engine::ProtocolEngine,
    registry::{ClientHandle, ConnectionRegistry},
    session::SessionDirectory,
    topic::TopicRegistry,
};

/// Shared broker state.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    sessions: SessionDirectory,
    topics: Arc<TopicRegistry>,
    connections: ConnectionRegistry,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker {
    /// Fresh broker with no users, topics or connections.
    pub fn new(config: BrokerConfig) -> Self {
        let topics = Arc::new(TopicRegistry::new());
        let connections = ConnectionRegistry::new(Arc::clone(&topics));
        Self { config, sessions: SessionDirectory::new(), topics, connections }
    }

    /// Connect hook.
    ///
    /// Assigns a connection id, registers `handle` for delivery and returns
    /// the engine that will process this connection's frames.
    pub fn accept(self: &Arc<Self>, handle: ClientHandle) -> ProtocolEngine {
        let connection_id = self.connections.connect(handle);
        tracing::debug!(connection_id, "connection accepted");
        ProtocolEngine::new(Arc::clone(self), connection_id)
    }

    /// Protocol settings.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Credentials and active logins.
    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    /// Topic registry.
    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    /// Connection directory.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }
}
