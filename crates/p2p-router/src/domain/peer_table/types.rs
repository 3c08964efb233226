//! Peer table result and snapshot types.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::domain::types::PeerId;

/// Outcome of admitting an inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Free slot
    Accepted,
    /// Admitted by displacing the returned inbound peer, which is now queued
    /// for eviction
    AcceptedEvicting(PeerId),
    /// Admitted in place of our own outbound connection to the same peer,
    /// which must be closed before the new one is registered
    Replacing,
}

/// Score change caused by a violation report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViolationOutcome {
    pub score: f64,
    /// The peer crossed the ban threshold
    pub banned: bool,
    /// The peer has a live connection that must be torn down
    pub connected: bool,
}

/// Counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub stored: usize,
    pub dialing: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub disconnecting: usize,
    pub evicted: usize,
    pub banned: usize,
}

impl PeerStats {
    /// Live connections in either direction.
    pub fn connected(&self) -> usize {
        self.inbound + self.outbound
    }
}

/// Persisted form of a peer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPeer {
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<SocketAddr>,
    #[serde(default)]
    pub persistent: bool,
    pub score: f64,
    #[serde(default)]
    pub banned: bool,
}
