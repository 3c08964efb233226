//! # Adapters
//!
//! Concrete implementations of the ports:
//!
//! - [`MemoryTransport`] - in-process links for tests and simulations
//! - [`TcpTransport`] - plaintext length-delimited TCP (feature `tcp`)
//! - [`JsonFilePeerStore`] - peer table persisted as JSON

mod handshake;
pub mod memory;
pub mod peer_store;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use memory::{MemoryConnection, MemoryNetwork, MemoryTransport};
pub use peer_store::JsonFilePeerStore;

#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpTransport};
