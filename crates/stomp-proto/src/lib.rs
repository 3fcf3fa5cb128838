//! Text frame protocol for the STOMP broker.
//!
//! Pure codec crate with no I/O:
//!
//! - [`Frame`]: command, header map and body, with parse and serialize
//! - [`ClientCommand`]: the commands a client may issue
//! - [`FrameDecoder`]: NUL-terminated byte-stream accumulator used by
//!   transports
//!
//! # Wire Format
//!
//! ```text
//! <COMMAND>\n<name>:<value>\n...\n\n<body>\0
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod command;
pub mod errors;
pub mod frame;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, encode};
pub use command::{CONNECTED, ClientCommand, ERROR, MESSAGE, RECEIPT, UnknownCommand, headers};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, SENTINEL};

/// Protocol version the broker speaks.
pub const PROTOCOL_VERSION: &str = "1.2";
