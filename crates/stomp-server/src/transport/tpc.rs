//! Thread-per-client transport.
//!
//! Every accepted socket gets a reader thread, which owns the engine, and a
//! writer thread, which drains the connection's outbound queue.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use bytes::Bytes;
use stomp_proto::FrameDecoder;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{Flow, READ_BUFFER_SIZE, pump};
use crate::{broker::Broker, error::ServerError, registry::ClientHandle};

/// Blocking TCP server with two threads per connection.
#[derive(Debug)]
pub struct ThreadPerClient {
    listener: TcpListener,
    broker: Arc<Broker>,
    max_frame_size: usize,
}

impl ThreadPerClient {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if the address cannot be bound.
    pub fn bind(
        address: &str,
        broker: Arc<Broker>,
        max_frame_size: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .map_err(|e| ServerError::Transport(format!("failed to bind '{address}': {e}")))?;

        tracing::info!("thread-per-client transport bound to {}", listener.local_addr()?);

        Ok(Self { listener, broker, max_frame_size })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    ///
    /// Blocks the calling thread. Per-connection failures are logged and
    /// never stop the accept loop.
    pub fn serve(self) -> Result<(), ServerError> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let broker = Arc::clone(&self.broker);
                    let max_frame_size = self.max_frame_size;

                    let spawned = thread::Builder::new()
                        .name("stomp-reader".to_string())
                        .spawn(move || handle_connection(stream, &broker, max_frame_size));
                    if let Err(e) = spawned {
                        tracing::error!("Failed to spawn connection thread: {}", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }

        Ok(())
    }
}

fn handle_connection(stream: TcpStream, broker: &Arc<Broker>, max_frame_size: usize) {
    let peer = stream.peer_addr().ok();

    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(?peer, "Failed to clone socket: {}", e);
            return;
        },
    };

    let (handle, rx) = ClientHandle::channel();
    let mut engine = broker.accept(handle.clone());
    let connection_id = engine.connection_id();
    tracing::debug!(connection_id, ?peer, "client connected");

    let spawned =
        thread::Builder::new().name("stomp-writer".to_string()).spawn(move || write_loop(write_half, rx));
    let writer = match spawned {
        Ok(writer) => writer,
        Err(e) => {
            tracing::error!(connection_id, "Failed to spawn writer thread: {}", e);
            engine.close();
            return;
        },
    };

    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
    let mut reader = stream;
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(connection_id, "peer closed connection");
                break;
            },
            Ok(n) => {
                if pump(&mut engine, &mut decoder, &handle, &buf[..n]) == Flow::Close {
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => {
                tracing::debug!(connection_id, "Read error: {}", e);
                break;
            },
        }
    }

    engine.close();
    drop(handle);

    if writer.join().is_err() {
        tracing::error!(connection_id, "writer thread panicked");
    }
}

fn write_loop(mut stream: TcpStream, mut rx: UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.blocking_recv() {
        if let Err(e) = stream.write_all(&bytes) {
            tracing::debug!("Write error: {}", e);
            break;
        }
    }

    if let Err(e) = stream.flush() {
        tracing::debug!("Flush error: {}", e);
    }
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        tracing::debug!("Shutdown error: {}", e);
    }
}
