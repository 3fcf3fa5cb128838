//! Protocol error types.

use thiserror::Error;

/// Convenience alias for codec results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural failures while parsing or accumulating frames.
///
/// None of these are fatal to the broker. The engine turns them into an
/// ERROR frame for the offending connection only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input contained no frame text at all
    #[error("empty frame")]
    EmptyFrame,

    /// Command line was blank after trimming
    #[error("frame has no command")]
    MissingCommand,

    /// A NUL sentinel appeared inside the header block
    #[error("NUL byte inside frame headers")]
    NulInHeaders,

    /// Accumulated frame exceeded the decoder limit
    #[error("frame too large: {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Bytes buffered when the limit was hit
        size: usize,
        /// Configured limit
        max: usize,
    },
}
