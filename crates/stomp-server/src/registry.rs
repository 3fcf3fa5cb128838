//! Connection registry for client handles and channel routing.
//!
//! Maps connection ids to outbound handles and routes frames to one
//! connection or to every member of a channel. Channel membership is the
//! subscriber list of the matching [`Topic`](crate::topic::Topic); the
//! registry holds no second copy that could drift from it.
//!
//! Lock order is always topic, then clients. Broadcast and membership changes
//! on a channel hold that topic's lock, so a departing connection is removed
//! from each channel under the same exclusion a broadcast uses.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::RwLock;
use stomp_proto::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::topic::TopicRegistry;

/// Outbound queue for one connection.
///
/// Sends never block: frames are queued and a single writer per connection
/// drains them in order, so two frames are never interleaved on the socket.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ClientHandle {
    /// Handle plus the receiving end the connection's writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue frame text. Returns `false` if the writer has gone away.
    pub fn send(&self, text: &str) -> bool {
        self.tx.send(stomp_proto::encode(text)).is_ok()
    }
}

/// Publishing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Topic does not exist or the sender is not one of its subscribers
    #[error("Client is not subscribed to topic: {0}")]
    NotSubscribed(String),
}

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Id allocated for this message on its topic
    pub message_id: u64,
    /// Subscribers whose queue accepted the frame
    pub delivered: usize,
}

/// Registry of live connections and their channel memberships.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Connection ID → outbound handle
    clients: RwLock<HashMap<u64, ClientHandle>>,
    /// Channel directory, shared with the broker
    channels: Arc<TopicRegistry>,
    /// Next connection ID. Never reused within a process
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry routing through `channels`.
    pub fn new(channels: Arc<TopicRegistry>) -> Self {
        Self { clients: RwLock::new(HashMap::new()), channels, next_id: AtomicU64::new(0) }
    }

    /// Allocate a fresh connection id. Sequential from 0.
    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an id and register `handle` under it.
    pub fn connect(&self, handle: ClientHandle) -> u64 {
        let connection_id = self.next_connection_id();
        self.register(connection_id, handle);
        connection_id
    }

    /// Register a handle under an id, replacing any previous one.
    pub fn register(&self, connection_id: u64, handle: ClientHandle) {
        self.clients.write().insert(connection_id, handle);
    }

    /// Remove a handle without touching channel membership.
    pub fn deregister(&self, connection_id: u64) -> Option<ClientHandle> {
        self.clients.write().remove(&connection_id)
    }

    /// Deliver text to one connection.
    ///
    /// Returns `false` if the connection is not registered or its writer is
    /// gone.
    pub fn send(&self, connection_id: u64, text: &str) -> bool {
        self.clients.read().get(&connection_id).is_some_and(|handle| handle.send(text))
    }

    /// Deliver the same text to every member of a channel, in member order.
    ///
    /// Returns the number of connections that accepted it.
    pub fn send_to_channel(&self, channel: &str, text: &str) -> usize {
        let Some(topic) = self.channels.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        topic.for_each_subscriber(|subscriber| {
            if self.send(subscriber.connection_id, text) {
                delivered += 1;
            }
        });
        delivered
    }

    /// Publish `body` to every subscriber of `channel` on behalf of `sender`.
    ///
    /// Each subscriber receives a MESSAGE carrying its own subscription id.
    /// Membership check, id allocation and fan-out happen under the topic
    /// lock.
    pub fn publish(&self, channel: &str, sender: u64, body: &str) -> Result<Delivery, PublishError> {
        let not_subscribed = || PublishError::NotSubscribed(channel.to_string());
        let topic = self.channels.get(channel).ok_or_else(not_subscribed)?;

        let mut delivered = 0;
        let message_id = topic
            .publish(sender, |subscriber, message_id| {
                let frame =
                    Frame::message(&subscriber.subscription_id, message_id, channel, body);
                if self.send(subscriber.connection_id, &frame.serialize()) {
                    delivered += 1;
                } else {
                    tracing::debug!(
                        connection_id = subscriber.connection_id,
                        destination = channel,
                        "subscriber not reachable, message dropped"
                    );
                }
            })
            .ok_or_else(not_subscribed)?;

        Ok(Delivery { message_id, delivered })
    }

    /// Join a channel, creating it if needed.
    ///
    /// Returns `true` if the channel was newly created.
    pub fn subscribe(&self, connection_id: u64, channel: &str, subscription_id: &str) -> bool {
        self.channels.add_subscriber(channel, connection_id, subscription_id)
    }

    /// Leave a channel. Returns `true` if the connection was a member.
    pub fn unsubscribe(&self, connection_id: u64, channel: &str) -> bool {
        self.channels.remove_subscriber(channel, connection_id)
    }

    /// Drop a connection: remove its handle and its membership in every
    /// channel.
    ///
    /// Returns the number of channels it was removed from.
    pub fn disconnect(&self, connection_id: u64) -> usize {
        self.deregister(connection_id);
        self.channels.all().iter().filter(|topic| topic.remove_subscriber(connection_id)).count()
    }

    /// Check if a connection is registered.
    pub fn is_connected(&self, connection_id: u64) -> bool {
        self.clients.read().contains_key(&connection_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Channel directory backing this registry.
    pub fn channels(&self) -> &Arc<TopicRegistry> {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(TopicRegistry::new()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn connection_ids_are_sequential_from_zero() {
        let registry = registry();
        let (a, _rx_a) = ClientHandle::channel();
        let (b, _rx_b) = ClientHandle::channel();

        assert_eq!(registry.connect(a), 0);
        assert_eq!(registry.connect(b), 1);
        assert_eq!(registry.next_connection_id(), 2);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_disconnect() {
        let registry = registry();
        let (a, _rx_a) = ClientHandle::channel();
        let id = registry.connect(a);
        registry.disconnect(id);

        let (b, _rx_b) = ClientHandle::channel();
        assert_eq!(registry.connect(b), id + 1);
    }

    #[test]
    fn send_to_registered_connection() {
        let registry = registry();
        let (handle, mut rx) = ClientHandle::channel();
        let id = registry.connect(handle);

        assert!(registry.send(id, "RECEIPT\nreceipt-id:1\n\n"));
        assert_eq!(drain(&mut rx), vec!["RECEIPT\nreceipt-id:1\n\n\0".to_string()]);
    }

    #[test]
    fn send_to_unknown_connection_is_not_delivered() {
        let registry = registry();
        assert!(!registry.send(99, "X\n\n"));
    }

    #[test]
    fn send_to_closed_writer_is_not_delivered() {
        let registry = registry();
        let (handle, rx) = ClientHandle::channel();
        let id = registry.connect(handle);
        drop(rx);

        assert!(!registry.send(id, "X\n\n"));
    }

    #[test]
    fn subscribe_reports_channel_creation() {
        let registry = registry();
        assert!(registry.subscribe(0, "/a", "1"));
        assert!(!registry.subscribe(1, "/a", "1"));
    }

    #[test]
    fn send_to_channel_follows_member_order() {
        let registry = registry();
        let (h0, mut rx0) = ClientHandle::channel();
        let (h1, mut rx1) = ClientHandle::channel();
        let (h2, mut rx2) = ClientHandle::channel();
        let id0 = registry.connect(h0);
        let id1 = registry.connect(h1);
        registry.connect(h2);

        registry.subscribe(id1, "/a", "s");
        registry.subscribe(id0, "/a", "s");

        assert_eq!(registry.send_to_channel("/a", "PING\n\n"), 2);
        assert_eq!(drain(&mut rx0).len(), 1);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(drain(&mut rx2).is_empty());

        assert_eq!(registry.send_to_channel("/missing", "PING\n\n"), 0);
    }

    #[test]
    fn publish_uses_each_subscribers_own_id() {
        let registry = registry();
        let (h0, mut rx0) = ClientHandle::channel();
        let (h1, mut rx1) = ClientHandle::channel();
        let id0 = registry.connect(h0);
        let id1 = registry.connect(h1);

        registry.subscribe(id0, "/news", "first");
        registry.subscribe(id1, "/news", "second");

        let delivery = registry.publish("/news", id1, "hello").unwrap();
        assert_eq!(delivery, Delivery { message_id: 1, delivered: 2 });

        let got0 = Frame::parse(&drain(&mut rx0)[0]).unwrap();
        let got1 = Frame::parse(&drain(&mut rx1)[0]).unwrap();
        assert_eq!(got0.header("subscription"), Some("first"));
        assert_eq!(got1.header("subscription"), Some("second"));
        assert_eq!(got0.header("message-id"), Some("1"));
        assert_eq!(got0.body, "hello");
    }

    #[test]
    fn publish_rejects_non_subscriber_and_unknown_topic() {
        let registry = registry();
        registry.subscribe(0, "/a", "s");

        assert_eq!(
            registry.publish("/a", 1, "x"),
            Err(PublishError::NotSubscribed("/a".to_string()))
        );
        assert_eq!(
            registry.publish("/nope", 0, "x"),
            Err(PublishError::NotSubscribed("/nope".to_string()))
        );
    }

    #[test]
    fn disconnect_removes_handle_and_all_memberships() {
        let registry = registry();
        let (handle, _rx) = ClientHandle::channel();
        let id = registry.connect(handle);
        registry.subscribe(id, "/a", "1");
        registry.subscribe(id, "/b", "2");
        registry.subscribe(id + 1, "/a", "1");

        assert_eq!(registry.disconnect(id), 2);
        assert!(!registry.is_connected(id));
        assert!(!registry.channels().is_subscribed("/a", id));
        assert!(!registry.channels().is_subscribed("/b", id));
        assert!(registry.channels().is_subscribed("/a", id + 1));
    }
}
