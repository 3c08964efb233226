//! # Transport Port
//!
//! The router never touches sockets. A Transport yields connections that
//! carry discrete frames and report a verified remote identity after the
//! handshake; encryption and authentication live behind this boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::TransportError;
use crate::domain::types::{NodeInfo, PeerId};

/// Source of peer connections.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the accept loop and any number of
/// dial tasks call into the same instance concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an outbound connection.
    async fn dial(&self, endpoint: SocketAddr) -> Result<Arc<dyn Connection>, TransportError>;

    /// Wait for the next inbound connection.
    ///
    /// Returns `TransportError::Closed` once the transport has been closed.
    async fn accept(&self) -> Result<Arc<dyn Connection>, TransportError>;

    /// Identity this transport authenticates as.
    fn local_peer_id(&self) -> PeerId;

    /// Address other nodes dial to reach us.
    fn local_endpoint(&self) -> SocketAddr;

    /// Stop accepting. Pending `accept` calls return `Closed`.
    async fn close(&self);
}

/// One bidirectional, framed link to a peer.
///
/// `read_frame` and `write_frame` are called from different tasks at the
/// same time; implementations must allow that.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Exchange node descriptions. Called exactly once, before any frame.
    async fn handshake(&self, local: &NodeInfo) -> Result<NodeInfo, TransportError>;

    /// Next frame, `None` on clean end of stream.
    async fn read_frame(&self) -> Result<Option<Bytes>, TransportError>;

    /// Write one frame.
    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError>;

    fn remote_endpoint(&self) -> SocketAddr;

    /// Close both directions. Pending reads return `None` or an error.
    async fn close(&self);
}
