//! Command names and header keys.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Server frame: successful CONNECT.
pub const CONNECTED: &str = "CONNECTED";
/// Server frame: delivery of a published message.
pub const MESSAGE: &str = "MESSAGE";
/// Server frame: acknowledgement of a client `receipt` header.
pub const RECEIPT: &str = "RECEIPT";
/// Server frame: rejected request.
pub const ERROR: &str = "ERROR";

/// Header names used by the broker.
pub mod headers {
    /// CONNECT: protocol version the client speaks
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// CONNECT: virtual host the client expects
    pub const HOST: &str = "host";
    /// CONNECT: user name
    pub const LOGIN: &str = "login";
    /// CONNECT: password
    pub const PASSCODE: &str = "passcode";
    /// SUBSCRIBE / SEND / MESSAGE: topic name
    pub const DESTINATION: &str = "destination";
    /// SUBSCRIBE / UNSUBSCRIBE: client-chosen subscription id
    pub const ID: &str = "id";
    /// Any client frame: request a RECEIPT
    pub const RECEIPT: &str = "receipt";
    /// RECEIPT / ERROR: echoed `receipt` value
    pub const RECEIPT_ID: &str = "receipt-id";
    /// ERROR: human-readable reason
    pub const MESSAGE: &str = "message";
    /// CONNECTED: negotiated version
    pub const VERSION: &str = "version";
    /// MESSAGE: the receiving subscriber's own subscription id
    pub const SUBSCRIPTION: &str = "subscription";
    /// MESSAGE: per-topic sequence number
    pub const MESSAGE_ID: &str = "message-id";
}

/// Commands a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCommand {
    /// Authenticate and open a session
    Connect,
    /// Join a topic
    Subscribe,
    /// Leave a topic
    Unsubscribe,
    /// Publish to a topic
    Send,
    /// Close the session gracefully
    Disconnect,
}

impl ClientCommand {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a command name is not one of [`ClientCommand`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for ClientCommand {
    type Err = UnknownCommand;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "SEND" => Ok(Self::Send),
            "DISCONNECT" => Ok(Self::Disconnect),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}
