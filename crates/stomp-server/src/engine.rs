//! Per-connection protocol state machine.
//!
//! Each live connection owns one [`ProtocolEngine`]. The transport hands it
//! complete frame text, the engine validates the request against the shared
//! [`Broker`] state, performs the side effects (login, subscription changes,
//! fan-out) and returns the frame to write back, if any.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  DISCONNECT + receipt   ┌────────────┐
//! │ Active │────────────────────────>│ Terminated │
//! └────────┘                         └────────────┘
//! ```
//!
//! Authentication is not an engine state: it is membership in the broker's
//! active-login table. Any rejected request releases this connection's login
//! (fail-closed) but leaves the connection open.

use std::{collections::HashMap, sync::Arc};

use stomp_proto::{ClientCommand, Frame, headers};

use crate::{broker::Broker, error::EngineError};

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting commands
    Active,
    /// DISCONNECT accepted; the transport should close after writing the
    /// response
    Terminated,
}

/// Protocol engine for one connection.
#[derive(Debug)]
pub struct ProtocolEngine {
    broker: Arc<Broker>,
    connection_id: u64,
    /// Subscription ID → destination, scoped to this connection
    subscriptions: HashMap<String, String>,
    state: EngineState,
    /// Disconnect hook already ran
    closed: bool,
}

impl ProtocolEngine {
    /// Engine for an already registered connection.
    ///
    /// Usually obtained through [`Broker::accept`].
    pub fn new(broker: Arc<Broker>, connection_id: u64) -> Self {
        Self {
            broker,
            connection_id,
            subscriptions: HashMap::new(),
            state: EngineState::Active,
            closed: false,
        }
    }

    /// Connection this engine serves.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// True once DISCONNECT was accepted.
    pub fn should_terminate(&self) -> bool {
        self.state == EngineState::Terminated
    }

    /// Destination bound to a subscription id.
    pub fn subscription(&self, subscription_id: &str) -> Option<&str> {
        self.subscriptions.get(subscription_id).map(String::as_str)
    }

    /// Number of live subscriptions on this connection.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Process one frame and return the wire text to write back.
    ///
    /// Never fails: every rejection becomes an ERROR frame.
    pub fn process(&mut self, text: &str) -> Option<String> {
        self.handle(text).map(|frame| frame.serialize())
    }

    /// Process one frame and return the response frame.
    ///
    /// Frames arriving after DISCONNECT or after [`close`](Self::close) are
    /// ignored.
    pub fn handle(&mut self, text: &str) -> Option<Frame> {
        if self.closed || self.should_terminate() {
            tracing::debug!(connection_id = self.connection_id, "frame after disconnect ignored");
            return None;
        }

        match Frame::parse(text).map_err(EngineError::from).and_then(|frame| self.dispatch(&frame))
        {
            Ok(response) => response,
            Err(err) => Some(self.reject(&err)),
        }
    }

    /// Disconnect hook.
    ///
    /// Releases everything this connection holds in the broker: channel
    /// memberships, its login and its delivery handle. Safe to call more
    /// than once; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscriptions.clear();

        let channels = self.broker.connections().disconnect(self.connection_id);
        if let Some(login) = self.broker.sessions().logout(self.connection_id) {
            tracing::info!(connection_id = self.connection_id, login = %login, "user logged out");
        }
        tracing::debug!(connection_id = self.connection_id, channels, "connection closed");
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let command = frame
            .command
            .parse::<ClientCommand>()
            .map_err(|unknown| EngineError::UnknownCommand(unknown.0))?;

        tracing::trace!(connection_id = self.connection_id, %command, "frame received");

        match command {
            ClientCommand::Connect => self.handle_connect(frame),
            ClientCommand::Subscribe => self.handle_subscribe(frame),
            ClientCommand::Unsubscribe => self.handle_unsubscribe(frame),
            ClientCommand::Send => self.handle_send(frame),
            ClientCommand::Disconnect => self.handle_disconnect(frame),
        }
    }

    fn handle_connect(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let (Some(version), Some(host), Some(login), Some(passcode)) = (
            frame.header(headers::ACCEPT_VERSION),
            frame.header(headers::HOST),
            frame.header(headers::LOGIN),
            frame.header(headers::PASSCODE),
        ) else {
            return Err(EngineError::missing("Missing required headers"));
        };

        let config = self.broker.config();
        if version != config.protocol_version {
            return Err(EngineError::violation("Version not supported"));
        }
        if host != config.server_id {
            return Err(EngineError::violation("Invalid host"));
        }

        let outcome = self.broker.sessions().login(self.connection_id, login, passcode)?;
        tracing::info!(connection_id = self.connection_id, login, ?outcome, "user logged in");

        Ok(Some(Frame::connected(config.protocol_version.as_str())))
    }

    fn handle_subscribe(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let (Some(destination), Some(id)) =
            (frame.header(headers::DESTINATION), frame.header(headers::ID))
        else {
            return Err(EngineError::missing("Missing headers"));
        };

        let connections = self.broker.connections();

        // Reusing an id for another destination replaces that subscription
        if let Some(previous) = self.subscriptions.get(id).filter(|d| d.as_str() != destination) {
            connections.unsubscribe(self.connection_id, previous);
        }
        // One subscription per topic: a new id replaces the old one
        self.subscriptions.retain(|sid, dest| sid == id || dest != destination);

        if connections.subscribe(self.connection_id, destination, id) {
            tracing::info!(destination, "topic created");
        }
        self.subscriptions.insert(id.to_string(), destination.to_string());

        tracing::debug!(connection_id = self.connection_id, destination, id, "subscribed");
        Ok(receipt_for(frame))
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let Some(id) = frame.header(headers::ID) else {
            return Err(EngineError::missing("Missing id header"));
        };

        match self.subscriptions.remove(id) {
            Some(destination) => {
                self.broker.connections().unsubscribe(self.connection_id, &destination);
                tracing::debug!(
                    connection_id = self.connection_id,
                    destination = %destination,
                    id,
                    "unsubscribed"
                );
            },
            None => {
                tracing::debug!(connection_id = self.connection_id, id, "unknown subscription id");
            },
        }

        Ok(receipt_for(frame))
    }

    fn handle_send(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let receipt = frame.header(headers::RECEIPT);
        let Some(destination) = frame.header(headers::DESTINATION) else {
            return Err(EngineError::missing("Missing destination header").with_receipt(receipt));
        };

        let delivery = self
            .broker
            .connections()
            .publish(destination, self.connection_id, &frame.body)
            .map_err(|err| EngineError::violation(err.to_string()).with_receipt(receipt))?;

        tracing::debug!(
            connection_id = self.connection_id,
            destination,
            message_id = delivery.message_id,
            delivered = delivery.delivered,
            "message published"
        );

        Ok(receipt_for(frame))
    }

    fn handle_disconnect(&mut self, frame: &Frame) -> Result<Option<Frame>, EngineError> {
        let Some(receipt) = frame.header(headers::RECEIPT) else {
            return Err(EngineError::missing("Missing receipt header"));
        };

        let connections = self.broker.connections();
        for destination in self.subscriptions.values() {
            connections.unsubscribe(self.connection_id, destination);
        }
        self.subscriptions.clear();

        if let Some(login) = self.broker.sessions().logout(self.connection_id) {
            tracing::info!(connection_id = self.connection_id, login = %login, "user logged out");
        }

        self.state = EngineState::Terminated;
        Ok(Some(Frame::receipt(receipt)))
    }

    /// Render a rejection. Any login held by this connection is released.
    fn reject(&mut self, err: &EngineError) -> Frame {
        tracing::warn!(connection_id = self.connection_id, error = %err, "request rejected");
        if let Some(login) = self.broker.sessions().logout(self.connection_id) {
            tracing::info!(connection_id = self.connection_id, login = %login, "login released after error");
        }
        err.to_frame()
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn receipt_for(frame: &Frame) -> Option<Frame> {
    frame.header(headers::RECEIPT).map(Frame::receipt)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::registry::ClientHandle;

    fn connect_frame(login: &str, passcode: &str) -> String {
        format!(
            "CONNECT\naccept-version:1.2\nhost:stomp.cs.bgu.ac.il\nlogin:{login}\npasscode:{passcode}\n\n"
        )
    }

    fn client(broker: &Arc<Broker>) -> (ProtocolEngine, UnboundedReceiver<Bytes>) {
        let (handle, rx) = ClientHandle::channel();
        (broker.accept(handle), rx)
    }

    fn respond(engine: &mut ProtocolEngine, text: &str) -> Frame {
        engine.handle(text).unwrap()
    }

    #[test]
    fn connect_succeeds_with_valid_headers() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = engine.process(&connect_frame("alice", "p")).unwrap();
        assert_eq!(response, "CONNECTED\nversion:1.2\n\n\0");
        assert_eq!(broker.sessions().active_login(engine.connection_id()), Some("alice".into()));
    }

    #[test]
    fn connect_missing_headers() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "CONNECT\naccept-version:1.2\nlogin:a\npasscode:p\n\n");
        assert_eq!(response.command, "ERROR");
        assert_eq!(response.header("message"), Some("Missing required headers"));
    }

    #[test]
    fn connect_rejects_wrong_version_and_host() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let wrong_version =
            "CONNECT\naccept-version:1.0\nhost:stomp.cs.bgu.ac.il\nlogin:a\npasscode:p\n\n";
        assert_eq!(respond(&mut engine, wrong_version).header("message"), Some("Version not supported"));

        let wrong_host = "CONNECT\naccept-version:1.2\nhost:example.org\nlogin:a\npasscode:p\n\n";
        assert_eq!(respond(&mut engine, wrong_host).header("message"), Some("Invalid host"));
        assert_eq!(broker.sessions().active_count(), 0);
    }

    #[test]
    fn error_releases_login() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        respond(&mut engine, &connect_frame("alice", "p"));

        let response = respond(&mut engine, "NACK\n\n");
        assert_eq!(response.header("message"), Some("Invalid command"));
        assert!(!broker.sessions().is_logged_in("alice"));
    }

    #[test]
    fn malformed_frame_produces_error() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        assert_eq!(respond(&mut engine, "").header("message"), Some("Malformed frame"));
        assert_eq!(respond(&mut engine, "\n\n").header("message"), Some("Malformed frame"));
    }

    #[test]
    fn subscribe_with_and_without_receipt() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "SUBSCRIBE\ndestination:/news\nid:1\nreceipt:2\n\n");
        assert_eq!(response.serialize(), "RECEIPT\nreceipt-id:2\n\n\0");
        assert_eq!(engine.handle("SUBSCRIBE\ndestination:/sports\nid:3\n\n"), None);

        assert_eq!(engine.subscription("1"), Some("/news"));
        assert!(broker.topics().is_subscribed("/news", engine.connection_id()));
        assert!(broker.topics().is_subscribed("/sports", engine.connection_id()));
    }

    #[test]
    fn subscribe_missing_headers() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "SUBSCRIBE\ndestination:/news\n\n");
        assert_eq!(response.header("message"), Some("Missing headers"));
        assert!(!broker.topics().contains("/news"));
    }

    #[test]
    fn resubscribe_same_topic_replaces_subscription_id() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        let id = engine.connection_id();

        engine.handle("SUBSCRIBE\ndestination:/news\nid:1\n\n");
        engine.handle("SUBSCRIBE\ndestination:/news\nid:2\n\n");

        assert_eq!(engine.subscription_count(), 1);
        assert_eq!(engine.subscription("2"), Some("/news"));
        let topic = broker.topics().get("/news").unwrap();
        assert_eq!(topic.subscription_id(id), Some("2".to_string()));
    }

    #[test]
    fn reused_id_moves_subscription_to_new_topic() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        let id = engine.connection_id();

        engine.handle("SUBSCRIBE\ndestination:/a\nid:1\n\n");
        engine.handle("SUBSCRIBE\ndestination:/b\nid:1\n\n");

        assert!(!broker.topics().is_subscribed("/a", id));
        assert!(broker.topics().is_subscribed("/b", id));
    }

    #[test]
    fn unsubscribe_requires_id() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "UNSUBSCRIBE\nreceipt:4\n\n");
        assert_eq!(response.header("message"), Some("Missing id header"));
        assert_eq!(response.header("receipt-id"), None);
    }

    #[test]
    fn unsubscribe_unknown_id_is_noop_with_receipt() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        engine.handle("SUBSCRIBE\ndestination:/a\nid:1\n\n");

        let response = respond(&mut engine, "UNSUBSCRIBE\nid:99\nreceipt:4\n\n");
        assert_eq!(response.serialize(), "RECEIPT\nreceipt-id:4\n\n\0");
        assert!(broker.topics().is_subscribed("/a", engine.connection_id()));
    }

    #[test]
    fn send_missing_destination_echoes_receipt() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "SEND\nreceipt:3\n\nbody");
        assert_eq!(response.header("message"), Some("Missing destination header"));
        assert_eq!(response.header("receipt-id"), Some("3"));
    }

    #[test]
    fn send_to_unsubscribed_topic_is_rejected() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "SEND\ndestination:/nowhere\nreceipt:3\n\nbody");
        assert_eq!(response.header("message"), Some("Client is not subscribed to topic: /nowhere"));
        assert_eq!(response.header("receipt-id"), Some("3"));
        assert!(!broker.topics().contains("/nowhere"));
    }

    #[test]
    fn send_delivers_to_self_when_subscribed() {
        let broker = Arc::new(Broker::default());
        let (mut engine, mut rx) = client(&broker);
        engine.handle("SUBSCRIBE\ndestination:/echo\nid:7\n\n");

        let response = respond(&mut engine, "SEND\ndestination:/echo\nreceipt:8\n\nping");
        assert_eq!(response.header("receipt-id"), Some("8"));

        let bytes = rx.try_recv().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let message = Frame::parse(text).unwrap();
        assert_eq!(message.command, "MESSAGE");
        assert_eq!(message.header("subscription"), Some("7"));
        assert_eq!(message.header("message-id"), Some("1"));
        assert_eq!(message.body, "ping");
    }

    #[test]
    fn disconnect_requires_receipt() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);

        let response = respond(&mut engine, "DISCONNECT\n\n");
        assert_eq!(response.header("message"), Some("Missing receipt header"));
        assert!(!engine.should_terminate());
    }

    #[test]
    fn disconnect_cleans_up_and_terminates() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        let id = engine.connection_id();
        respond(&mut engine, &connect_frame("alice", "p"));
        engine.handle("SUBSCRIBE\ndestination:/a\nid:1\n\n");

        let response = respond(&mut engine, "DISCONNECT\nreceipt:9\n\n");
        assert_eq!(response.serialize(), "RECEIPT\nreceipt-id:9\n\n\0");
        assert!(engine.should_terminate());
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(!broker.topics().is_subscribed("/a", id));
        assert!(!broker.sessions().is_logged_in("alice"));

        // Further frames are ignored
        assert_eq!(engine.handle("SEND\ndestination:/a\n\nx"), None);
    }

    #[test]
    fn close_releases_everything_and_is_idempotent() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        let id = engine.connection_id();
        respond(&mut engine, &connect_frame("alice", "p"));
        engine.handle("SUBSCRIBE\ndestination:/a\nid:1\n\n");

        engine.close();
        engine.close();
        assert_eq!(engine.handle("SUBSCRIBE\ndestination:/b\nid:2\n\n"), None);

        assert!(!broker.connections().is_connected(id));
        assert!(!broker.topics().contains("/b"));
        assert!(!broker.topics().is_subscribed("/a", id));
        assert!(!broker.sessions().is_logged_in("alice"));
    }

    #[test]
    fn dropping_engine_runs_disconnect_hook() {
        let broker = Arc::new(Broker::default());
        let (mut engine, _rx) = client(&broker);
        respond(&mut engine, &connect_frame("alice", "p"));
        drop(engine);

        let (mut other, _rx2) = client(&broker);
        let response = respond(&mut other, &connect_frame("alice", "p"));
        assert_eq!(response.command, "CONNECTED");
    }
}
