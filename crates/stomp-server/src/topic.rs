//! Topic registry.
//!
//! A topic owns its subscriber list and its message-id counter behind a
//! single mutex. That list is the only record of who is subscribed: channel
//! broadcast, membership checks and id allocation all go through the same
//! lock, so "who receives message N" is decided atomically with respect to
//! concurrent subscribe, unsubscribe and disconnect.
//!
//! Topics are created lazily on first subscribe and are never removed, even
//! once their last subscriber leaves.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

/// One connection's membership in a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// Connection holding the subscription
    pub connection_id: u64,
    /// Client-chosen id, unique only within that connection
    pub subscription_id: String,
}

#[derive(Debug, Default)]
struct TopicState {
    /// Insertion order is delivery order
    subscribers: Vec<Subscriber>,
    /// Last id handed out; 0 means none yet
    last_message_id: u64,
}

impl TopicState {
    fn position(&self, connection_id: u64) -> Option<usize> {
        self.subscribers.iter().position(|s| s.connection_id == connection_id)
    }
}

/// A named channel with its subscribers and message sequence.
#[derive(Debug)]
pub struct Topic {
    name: String,
    state: Mutex<TopicState>,
}

impl Topic {
    /// Empty topic.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(TopicState::default()) }
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add or update a connection's subscription.
    ///
    /// A connection holds at most one subscription per topic. Subscribing
    /// again replaces the subscription id but keeps the delivery position.
    /// Returns `true` if the connection was not subscribed before.
    pub fn add_subscriber(&self, connection_id: u64, subscription_id: impl Into<String>) -> bool {
        let subscription_id = subscription_id.into();
        let mut state = self.state.lock();
        match state.position(connection_id) {
            Some(idx) => {
                state.subscribers[idx].subscription_id = subscription_id;
                false
            },
            None => {
                state.subscribers.push(Subscriber { connection_id, subscription_id });
                true
            },
        }
    }

    /// Remove a connection. Returns `true` if it was subscribed.
    pub fn remove_subscriber(&self, connection_id: u64) -> bool {
        let mut state = self.state.lock();
        match state.position(connection_id) {
            Some(idx) => {
                state.subscribers.remove(idx);
                true
            },
            None => false,
        }
    }

    /// Check if a connection is subscribed.
    pub fn is_subscribed(&self, connection_id: u64) -> bool {
        self.state.lock().position(connection_id).is_some()
    }

    /// Subscription id a connection uses for this topic.
    pub fn subscription_id(&self, connection_id: u64) -> Option<String> {
        let state = self.state.lock();
        state.position(connection_id).map(|idx| state.subscribers[idx].subscription_id.clone())
    }

    /// Allocate the next message id. Strictly increasing, starting at 1.
    pub fn next_message_id(&self) -> u64 {
        let mut state = self.state.lock();
        state.last_message_id += 1;
        state.last_message_id
    }

    /// Last id handed out, 0 if the topic never carried a message.
    pub fn last_message_id(&self) -> u64 {
        self.state.lock().last_message_id
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Point-in-time copy of the subscriber list, in delivery order.
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.state.lock().subscribers.clone()
    }

    /// Visit every subscriber while holding the topic lock.
    ///
    /// Returns the number of subscribers visited.
    pub fn for_each_subscriber(&self, mut visit: impl FnMut(&Subscriber)) -> usize {
        let state = self.state.lock();
        for subscriber in &state.subscribers {
            visit(subscriber);
        }
        state.subscribers.len()
    }

    /// Publish on behalf of `sender`.
    ///
    /// Under one lock: verifies `sender` is subscribed, allocates the next
    /// message id and hands every current subscriber to `deliver` together
    /// with that id. Returns `None` without allocating if `sender` is not a
    /// subscriber.
    pub fn publish(&self, sender: u64, mut deliver: impl FnMut(&Subscriber, u64)) -> Option<u64> {
        let mut state = self.state.lock();
        state.position(sender)?;

        state.last_message_id += 1;
        let message_id = state.last_message_id;
        for subscriber in &state.subscribers {
            deliver(subscriber, message_id);
        }
        Some(message_id)
    }
}

/// Registry of all topics, keyed by name.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a topic.
    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().get(name).cloned()
    }

    /// Look up a topic, creating it if absent.
    ///
    /// The flag is `true` when this call created the topic.
    pub fn get_or_create(&self, name: &str) -> (Arc<Topic>, bool) {
        if let Some(topic) = self.get(name) {
            return (topic, false);
        }

        let mut topics = self.topics.write();
        // Re-check: another connection may have won the race
        if let Some(topic) = topics.get(name) {
            return (Arc::clone(topic), false);
        }
        let topic = Arc::new(Topic::new(name));
        topics.insert(name.to_string(), Arc::clone(&topic));
        (topic, true)
    }

    /// Subscribe a connection, creating the topic if needed.
    ///
    /// Returns `true` if the topic was created by this call.
    pub fn add_subscriber(&self, name: &str, connection_id: u64, subscription_id: &str) -> bool {
        let (topic, created) = self.get_or_create(name);
        topic.add_subscriber(connection_id, subscription_id);
        created
    }

    /// Unsubscribe a connection. Returns `true` if it was subscribed.
    pub fn remove_subscriber(&self, name: &str, connection_id: u64) -> bool {
        self.get(name).is_some_and(|topic| topic.remove_subscriber(connection_id))
    }

    /// Check if a connection is subscribed to a topic.
    pub fn is_subscribed(&self, name: &str, connection_id: u64) -> bool {
        self.get(name).is_some_and(|topic| topic.is_subscribed(connection_id))
    }

    /// Allocate the next message id on a topic. `None` if the topic is unknown.
    pub fn next_message_id(&self, name: &str) -> Option<u64> {
        self.get(name).map(|topic| topic.next_message_id())
    }

    /// Snapshot of every registered topic.
    pub fn all(&self) -> Vec<Arc<Topic>> {
        self.topics.read().values().cloned().collect()
    }

    /// Check if a topic exists.
    pub fn contains(&self, name: &str) -> bool {
        self.topics.read().contains_key(name)
    }

    /// Number of registered topics.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}
