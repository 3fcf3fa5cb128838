//! TCP transports.
//!
//! Two connection scheduling strategies share the same per-connection
//! contract:
//!
//! - a reader feeds socket bytes through a [`FrameDecoder`] and hands each
//!   complete frame to the connection's [`ProtocolEngine`]
//! - every response is queued on the connection's [`ClientHandle`], the same
//!   queue broadcasts use, and a single writer drains it to the socket
//! - on DISCONNECT, EOF, read error or an oversized frame the reader runs the
//!   disconnect hook and drops its sender; the writer flushes what is queued
//!   and shuts the socket down
//!
//! [`ThreadPerClient`] runs each connection on blocking OS threads;
//! [`Reactor`] multiplexes connections as tasks on a tokio runtime.

mod reactor;
mod tpc;

pub use reactor::Reactor;
use stomp_proto::FrameDecoder;
pub use tpc::ThreadPerClient;

use crate::{engine::ProtocolEngine, error::EngineError, registry::ClientHandle};

/// Bytes requested per socket read.
const READ_BUFFER_SIZE: usize = 4096;

/// What the reader does after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Run a chunk of socket bytes through the decoder and engine.
///
/// Bytes after a frame that terminated the session are discarded.
fn pump(
    engine: &mut ProtocolEngine,
    decoder: &mut FrameDecoder,
    handle: &ClientHandle,
    chunk: &[u8],
) -> Flow {
    for &byte in chunk {
        match decoder.decode_next_byte(byte) {
            Ok(Some(text)) => {
                if let Some(response) = engine.process(&text) {
                    handle.send(&response);
                }
                if engine.should_terminate() {
                    return Flow::Close;
                }
            },
            Ok(None) => {},
            Err(err) => {
                tracing::warn!(
                    connection_id = engine.connection_id(),
                    error = %err,
                    "closing connection"
                );
                handle.send(&EngineError::from(err).to_frame().serialize());
                return Flow::Close;
            },
        }
    }
    Flow::Continue
}
