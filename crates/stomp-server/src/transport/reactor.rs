//! Reactor transport.
//!
//! Connections are tasks on a tokio runtime: one reader task running the
//! engine and one writer task draining the outbound queue.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use stomp_proto::FrameDecoder;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc::UnboundedReceiver,
};

use super::{Flow, READ_BUFFER_SIZE, pump};
use crate::{broker::Broker, error::ServerError, registry::ClientHandle};

/// Event-driven TCP server.
#[derive(Debug)]
pub struct Reactor {
    listener: TcpListener,
    broker: Arc<Broker>,
    max_frame_size: usize,
}

impl Reactor {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `ServerError::Transport` if the address cannot be bound.
    pub async fn bind(
        address: &str,
        broker: Arc<Broker>,
        max_frame_size: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind '{address}': {e}")))?;

        tracing::info!("reactor transport bound to {}", listener.local_addr()?);

        Ok(Self { listener, broker, max_frame_size })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, spawning a task per connection.
    pub async fn serve(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let broker = Arc::clone(&self.broker);
                    let max_frame_size = self.max_frame_size;

                    tokio::spawn(async move {
                        handle_connection(stream, peer, broker, max_frame_size).await;
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<Broker>,
    max_frame_size: usize,
) {
    let (mut reader, write_half) = stream.into_split();
    let (handle, rx) = ClientHandle::channel();
    let mut engine = broker.accept(handle.clone());
    let connection_id = engine.connection_id();
    tracing::debug!(connection_id, %peer, "client connected");

    let writer = tokio::spawn(write_loop(write_half, rx));

    let mut decoder = FrameDecoder::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(connection_id, "peer closed connection");
                break;
            },
            Ok(n) => {
                if pump(&mut engine, &mut decoder, &handle, &buf[..n]) == Flow::Close {
                    break;
                }
            },
            Err(e) => {
                tracing::debug!(connection_id, "Read error: {}", e);
                break;
            },
        }
    }

    engine.close();
    drop(handle);

    if let Err(e) = writer.await {
        tracing::error!(connection_id, "writer task failed: {}", e);
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!("Write error: {}", e);
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown error: {}", e);
    }
}
