//! Error types.
//!
//! [`EngineError`] covers every way a client request can be rejected. Its
//! `Display` text is exactly the `message` header of the ERROR frame sent
//! back, so rendering an error for the wire is `to_frame()`.
//!
//! [`ServerError`] covers failures of the process itself: configuration,
//! binding, accepting connections.

use stomp_proto::{Frame, ProtocolError};
use thiserror::Error;

use crate::session::LoginError;

/// A rejected client request.
///
/// None of these are fatal to the broker; they affect the offending
/// connection only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Frame text could not be parsed
    #[error("Malformed frame")]
    MalformedFrame(#[from] ProtocolError),

    /// One or more required headers are absent
    #[error("{message}")]
    MissingHeader {
        /// Client-facing message
        message: &'static str,
        /// Receipt supplied by the request, echoed in the ERROR frame
        receipt: Option<String>,
    },

    /// Request is well-formed but not allowed
    #[error("{reason}")]
    ProtocolViolation {
        /// Client-facing message
        reason: String,
        /// Receipt supplied by the request, echoed in the ERROR frame
        receipt: Option<String>,
    },

    /// Command is not one the broker understands
    #[error("Invalid command")]
    UnknownCommand(String),
}

impl EngineError {
    /// Missing-header rejection without a receipt.
    pub fn missing(message: &'static str) -> Self {
        Self::MissingHeader { message, receipt: None }
    }

    /// Protocol violation without a receipt.
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation { reason: reason.into(), receipt: None }
    }

    /// Attach the request's receipt so the ERROR frame echoes it.
    #[must_use]
    pub fn with_receipt(self, receipt: Option<&str>) -> Self {
        let receipt = receipt.map(str::to_string);
        match self {
            Self::MissingHeader { message, .. } => Self::MissingHeader { message, receipt },
            Self::ProtocolViolation { reason, .. } => Self::ProtocolViolation { reason, receipt },
            other => other,
        }
    }

    /// Receipt to echo, if any.
    pub fn receipt(&self) -> Option<&str> {
        match self {
            Self::MissingHeader { receipt, .. } | Self::ProtocolViolation { receipt, .. } => {
                receipt.as_deref()
            },
            Self::MalformedFrame(_) | Self::UnknownCommand(_) => None,
        }
    }

    /// ERROR frame reporting this rejection.
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.to_string(), self.receipt())
    }
}

impl From<LoginError> for EngineError {
    fn from(err: LoginError) -> Self {
        Self::violation(err.to_string())
    }
}

/// Errors that stop the server or one of its listeners.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, bad thread count, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, runtime construction, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_client_facing_message() {
        assert_eq!(EngineError::MalformedFrame(ProtocolError::EmptyFrame).to_string(), "Malformed frame");
        assert_eq!(EngineError::missing("Missing id header").to_string(), "Missing id header");
        assert_eq!(EngineError::UnknownCommand("NACK".into()).to_string(), "Invalid command");
        assert_eq!(EngineError::from(LoginError::WrongPassword).to_string(), "Wrong password");
    }

    #[test]
    fn error_frame_echoes_receipt() {
        let err = EngineError::violation("Client is not subscribed to topic: /a")
            .with_receipt(Some("5"));
        let frame = err.to_frame();

        assert_eq!(frame.command, "ERROR");
        assert_eq!(frame.header("message"), Some("Client is not subscribed to topic: /a"));
        assert_eq!(frame.header("receipt-id"), Some("5"));
    }

    #[test]
    fn malformed_frame_never_carries_receipt() {
        let err = EngineError::MalformedFrame(ProtocolError::MissingCommand).with_receipt(Some("1"));
        assert_eq!(err.receipt(), None);
    }

    #[test]
    fn server_error_display() {
        let err = ServerError::Config("bad port".to_string());
        assert_eq!(err.to_string(), "configuration error: bad port");
    }
}
