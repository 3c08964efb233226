//! # In-Memory Transport
//!
//! Connections are pairs of bounded mpsc pipes inside one process. Every
//! transport gets its own `10.0.x.y` endpoint so per-IP limits behave as
//! they would on a real network.
//!
//! The handshake trusts the reported identity; there is no authentication.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::handshake::{decode_node_info, encode_node_info};
use crate::domain::errors::TransportError;
use crate::domain::types::{NodeInfo, PeerId};
use crate::ports::{Connection, Transport};

/// Frames buffered per direction before `write_frame` waits.
pub const PIPE_CAPACITY: usize = 64;

/// Port used for generated endpoints.
const MEMORY_PORT: u16 = 26656;

/// Pending inbound connections per listener.
const ACCEPT_BACKLOG: usize = 64;

#[derive(Default)]
struct NetworkState {
    listeners: HashMap<SocketAddr, mpsc::Sender<Arc<MemoryConnection>>>,
    next_host: u16,
}

/// A shared in-process network. Clones refer to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("listeners", &self.state.lock().listeners.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a transport at the next free `10.0.x.y` endpoint.
    pub fn transport(&self, peer_id: PeerId) -> Arc<MemoryTransport> {
        let endpoint = {
            let mut state = self.state.lock();
            state.next_host += 1;
            let [hi, lo] = state.next_host.to_be_bytes();
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, hi, lo)), MEMORY_PORT)
        };
        self.transport_at(peer_id, endpoint)
    }

    /// Attach a transport at a chosen endpoint, replacing any previous listener there.
    pub fn transport_at(&self, peer_id: PeerId, endpoint: SocketAddr) -> Arc<MemoryTransport> {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        self.state.lock().listeners.insert(endpoint, tx);
        Arc::new(MemoryTransport {
            peer_id,
            endpoint,
            network: self.clone(),
            incoming: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        })
    }

    fn listener(&self, endpoint: &SocketAddr) -> Option<mpsc::Sender<Arc<MemoryConnection>>> {
        self.state.lock().listeners.get(endpoint).cloned()
    }

    fn detach(&self, endpoint: &SocketAddr) {
        self.state.lock().listeners.remove(endpoint);
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    peer_id: PeerId,
    endpoint: SocketAddr,
    network: MemoryNetwork,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Arc<MemoryConnection>>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("peer_id", &self.peer_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, endpoint: SocketAddr) -> Result<Arc<dyn Connection>, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let listener = self
            .network
            .listener(&endpoint)
            .ok_or(TransportError::ConnectionRefused(endpoint))?;

        let (local, remote) = MemoryConnection::pair(self.endpoint, endpoint);
        listener
            .send(Arc::new(remote))
            .await
            .map_err(|_| TransportError::ConnectionRefused(endpoint))?;
        Ok(Arc::new(local))
    }

    async fn accept(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            conn = incoming.recv() => match conn {
                Some(conn) => Ok(conn as Arc<dyn Connection>),
                None => Err(TransportError::Closed),
            },
        }
    }

    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn local_endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    async fn close(&self) {
        self.closed.cancel();
        self.network.detach(&self.endpoint);
    }
}

/// One end of an in-memory link.
pub struct MemoryConnection {
    tx: mpsc::Sender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    remote: SocketAddr,
    /// Shared by both ends; cancelled when either side closes
    link: CancellationToken,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("remote", &self.remote)
            .field("closed", &self.link.is_cancelled())
            .finish()
    }
}

impl MemoryConnection {
    /// Two connected ends. The first is seen by `a` and reports `b` as its
    /// remote endpoint, and vice versa.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(PIPE_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(PIPE_CAPACITY);
        let link = CancellationToken::new();
        (
            Self {
                tx: a_tx,
                rx: tokio::sync::Mutex::new(a_rx),
                remote: b,
                link: link.clone(),
            },
            Self {
                tx: b_tx,
                rx: tokio::sync::Mutex::new(b_rx),
                remote: a,
                link,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_cancelled()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn handshake(&self, local: &NodeInfo) -> Result<NodeInfo, TransportError> {
        self.write_frame(encode_node_info(local)?).await?;
        decode_node_info(self.read_frame().await?)
    }

    async fn read_frame(&self) -> Result<Option<Bytes>, TransportError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            frame = rx.recv() => Ok(frame),
            // frames written before the close are still delivered
            _ = self.link.cancelled() => Ok(rx.try_recv().ok()),
        }
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.link.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.link.cancelled() => Err(TransportError::Closed),
            sent = self.tx.send(frame) => sent.map_err(|_| TransportError::Closed),
        }
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    async fn close(&self) {
        self.link.cancel();
    }
}
