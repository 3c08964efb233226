//! # Peer Store Port
//!
//! Persistence of peer records across restarts.

use crate::domain::errors::PeerStoreError;
use crate::domain::peer_table::StoredPeer;

/// Durable storage for the peer table.
pub trait PeerStore: Send + Sync {
    /// Load every stored record. A store that has never been written is empty.
    fn load(&self) -> Result<Vec<StoredPeer>, PeerStoreError>;

    /// Replace the stored records.
    fn save(&self, peers: &[StoredPeer]) -> Result<(), PeerStoreError>;
}
