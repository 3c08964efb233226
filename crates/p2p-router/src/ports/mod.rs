//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driven:** [`Transport`]/[`Connection`] (authenticated frame streams),
//!   [`PeerStore`] (persistence)
//! - **Driving:** [`Reactor`] (protocol consumers plugged into a channel)

pub mod peer_store;
pub mod reactor;
pub mod transport;

pub use peer_store::PeerStore;
pub use reactor::Reactor;
pub use transport::{Connection, Transport};
