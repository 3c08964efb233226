//! # Service Layer
//!
//! Wires the domain to the ports and owns every task.
//!
//! - [`Router`] - lifecycle, channel registration, accept/dial/evict loops
//! - [`Channel`] - a Reactor's send/receive handle on one stream
//! - [`PeerManager`] - thread-safe peer table with async dial/evict waits

// Semantic submodules
mod channel;
mod peer_connection;
mod peer_manager;
mod queue;
mod reactor;
mod registry;
mod router;

// Re-export public API
pub use channel::Channel;
pub use peer_manager::PeerManager;
pub use router::Router;
