//! # TCP Transport
//!
//! Plaintext TCP with `u32` big-endian length-prefixed frames
//! (`tokio_util::codec::LengthDelimitedCodec`). For local networks and
//! testing only: the handshake trusts the reported identity and nothing is
//! encrypted.
//!
//! Requires feature: `tcp`

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handshake::{decode_node_info, encode_node_info};
use crate::domain::errors::TransportError;
use crate::domain::types::{NodeInfo, PeerId};
use crate::ports::{Connection, Transport};

fn codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .max_frame_length(max_frame_size)
        .new_codec()
}

/// Listening TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    peer_id: PeerId,
    listener: TcpListener,
    local: SocketAddr,
    max_frame_size: usize,
    closed: CancellationToken,
}

impl TcpTransport {
    /// Bind a listener. Use port 0 for an ephemeral port.
    pub async fn bind(
        peer_id: PeerId,
        addr: SocketAddr,
        max_frame_size: usize,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        debug!(%local, "tcp transport listening");
        Ok(Self {
            peer_id,
            listener,
            local,
            max_frame_size,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, endpoint: SocketAddr) -> Result<Arc<dyn Connection>, TransportError> {
        let stream = TcpStream::connect(endpoint).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                TransportError::ConnectionRefused(endpoint)
            } else {
                TransportError::Io(e)
            }
        })?;
        Ok(Arc::new(TcpConnection::new(stream, endpoint, self.max_frame_size)?))
    }

    async fn accept(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let (stream, remote) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            accepted = self.listener.accept() => accepted?,
        };
        Ok(Arc::new(TcpConnection::new(stream, remote, self.max_frame_size)?))
    }

    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// One framed TCP stream, split so reads and writes proceed independently.
#[derive(Debug)]
pub struct TcpConnection {
    reader: Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    remote: SocketAddr,
    max_frame_size: usize,
    closed: CancellationToken,
}

impl TcpConnection {
    fn new(stream: TcpStream, remote: SocketAddr, max_frame_size: usize) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(FramedRead::new(read_half, codec(max_frame_size))),
            writer: Mutex::new(FramedWrite::new(write_half, codec(max_frame_size))),
            remote,
            max_frame_size,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn handshake(&self, local: &NodeInfo) -> Result<NodeInfo, TransportError> {
        self.write_frame(encode_node_info(local)?).await?;
        decode_node_info(self.read_frame().await?)
    }

    async fn read_frame(&self) -> Result<Option<Bytes>, TransportError> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            frame = reader.next() => match frame {
                Some(Ok(frame)) => Ok(Some(frame.freeze())),
                Some(Err(e)) => Err(TransportError::Io(e)),
                None => Ok(None),
            },
        }
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            sent = writer.send(frame) => sent.map_err(TransportError::Io),
        }
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    async fn close(&self) {
        self.closed.cancel();
        // best effort: a writer still holding the lock drops the socket on its own
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.get_mut().shutdown().await;
        }
    }
}
