//! # P2P Router
//!
//! Peer-to-peer message router for a BFT blockchain node.
//!
//! Multiplexes logical channels (consensus, mempool, block sync, ...) over a
//! single connection per peer, decides which peers to dial, accept and
//! evict, and keeps every queue bounded so a slow peer or a slow Reactor
//! never stalls anyone else.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** peer table state machine, bounded FIFO, frames, WRR scheduling
//! - **Ports Layer:** `Transport`/`Connection`, `Reactor`, `PeerStore`
//! - **Service Layer:** `Router`, `Channel`, `PeerManager` and the per-peer workers
//! - **Adapters Layer:** memory and TCP transports, JSON peer store
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use p2p_router::{
//!     ChannelDescriptor, ChannelId, DropPolicy, Envelope, MemoryNetwork, PeerId, Router,
//!     RouterConfig, RouterMetrics,
//! };
//!
//! # async fn demo() -> p2p_router::Result<()> {
//! let network = MemoryNetwork::new();
//! let transport = network.transport(PeerId::from_public_key(b"node-a"));
//! let router = Router::new(RouterConfig::default(), transport, RouterMetrics::nop())?;
//!
//! let votes = router.open_channel(
//!     ChannelDescriptor::new(ChannelId(0x22), "vote")
//!         .with_priority(3)
//!         .with_drop_policy(DropPolicy::DropOldest),
//! )?;
//! router.start()?;
//!
//! votes.send(Envelope::broadcast(&b"prevote"[..])).await?;
//! let envelope = votes.receive().await?;
//! println!("{} bytes from {:?}", envelope.size(), envelope.from);
//!
//! router.stop().await;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    AcceptOutcome, BackoffConfig, ChannelId, ConfigurationError, Direction, DisconnectReason,
    DropPolicy, Envelope, NodeInfo, PeerAddress, PeerError, PeerId, PeerManagerConfig,
    PeerManagerError, PeerState, PeerStats, PeerStatus, PeerStoreError, PeerUpdate,
    ProtocolViolation, Result, RouterError, ScoreConfig, StoredPeer, TransportError,
};

// Configuration and metrics
pub use config::{ChannelDescriptor, RouterConfig};
pub use metrics::{RouterMetrics, METRICS_SUBSYSTEM};

// Port traits
pub use ports::{Connection, PeerStore, Reactor, Transport};

// Service
pub use service::{Channel, PeerManager, Router};

// Adapters
pub use adapters::{JsonFilePeerStore, MemoryConnection, MemoryNetwork, MemoryTransport};

#[cfg(feature = "tcp")]
pub use adapters::{TcpConnection, TcpTransport};
