//! Structured text frame.
//!
//! Wire layout:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...
//! \n
//! body\0
//! ```
//!
//! No header escaping is performed. A value may itself contain colons because
//! each header line is split on its first colon only.

use std::{collections::BTreeMap, fmt};

use bytes::BufMut;

use crate::{
    command::{CONNECTED, ERROR, MESSAGE, RECEIPT, headers},
    errors::{ProtocolError, Result},
};

/// Frame terminator on the wire.
pub const SENTINEL: char = '\0';

/// A parsed or to-be-serialized protocol frame.
///
/// # Invariants
///
/// - `command` is non-empty after trimming.
/// - No header name or value contains [`SENTINEL`].
///
/// Both are enforced by [`Frame::parse`]. Frames built by hand are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Command line, trimmed
    pub command: String,
    /// Header map. Last duplicate wins, order is not significant
    pub headers: BTreeMap<String, String>,
    /// Body text without the terminator
    pub body: String,
}

impl Frame {
    /// Frame with the given command, no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), headers: BTreeMap::new(), body: String::new() }
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Header presence check.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// ERROR frame carrying `message` and, if given, the request's receipt.
    pub fn error(message: impl Into<String>, receipt_id: Option<&str>) -> Self {
        let frame = Self::new(ERROR).with_header(headers::MESSAGE, message);
        match receipt_id {
            Some(id) => frame.with_header(headers::RECEIPT_ID, id),
            None => frame,
        }
    }

    /// RECEIPT frame acknowledging `receipt_id`.
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        Self::new(RECEIPT).with_header(headers::RECEIPT_ID, receipt_id)
    }

    /// MESSAGE frame for a single subscriber.
    pub fn message(
        subscription: impl Into<String>,
        message_id: u64,
        destination: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(MESSAGE)
            .with_header(headers::SUBSCRIPTION, subscription)
            .with_header(headers::MESSAGE_ID, message_id.to_string())
            .with_header(headers::DESTINATION, destination)
            .with_body(body)
    }

    /// CONNECTED frame announcing the negotiated version.
    pub fn connected(version: impl Into<String>) -> Self {
        Self::new(CONNECTED).with_header(headers::VERSION, version)
    }

    /// Parse frame text.
    ///
    /// The text is expected without the stream terminator, but a trailing
    /// terminator is tolerated and stripped. Leading end-of-line characters
    /// (heartbeats) are skipped. Header lines without a colon are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyFrame` for empty input
    /// - `ProtocolError::MissingCommand` if the command line is blank
    /// - `ProtocolError::NulInHeaders` if the header block holds a NUL
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        let text = text.trim_start_matches(['\r', '\n']);
        let (head, body) = split_at_blank_line(text);

        // Without a body block the terminator, if any, trails the headers
        let head = if body.is_some() { head } else { head.trim_end_matches(SENTINEL) };
        if head.contains(SENTINEL) {
            return Err(ProtocolError::NulInHeaders);
        }

        let mut lines = head.lines();
        let command = lines.next().map(str::trim).unwrap_or_default();
        if command.is_empty() {
            return Err(ProtocolError::MissingCommand);
        }

        let mut headers = BTreeMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_string(), value.trim().to_string());
            }
        }

        let body = body.map(|b| b.trim_end_matches(SENTINEL).to_string()).unwrap_or_default();

        Ok(Self { command: command.to_string(), headers, body })
    }

    /// Wire text including the terminator.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.encoded_len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(SENTINEL);
        out
    }

    /// Write the wire form into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.serialize().as_bytes());
    }

    /// Exact byte length of [`Frame::serialize`].
    pub fn encoded_len(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
        self.command.len() + 1 + headers + 1 + self.body.len() + 1
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Split into header block and body block at the first empty line.
fn split_at_blank_line(text: &str) -> (&str, Option<&str>) {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let end = offset + line.len();
        if offset > 0 && matches!(line, "\n" | "\r\n") {
            return (&text[..offset], Some(&text[end..]));
        }
        offset = end;
    }
    (text, None)
}
