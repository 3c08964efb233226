//! ID-keyed tables shared by the router, its channels and its workers.
//!
//! Nothing here points back at the Router; channels and workers look peers
//! and queues up by id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::queue::ChannelQueue;
use crate::domain::types::{ChannelId, Direction, DisconnectReason, PeerId};

/// Live state of one connected peer visible to channels.
#[derive(Debug)]
pub struct PeerSlot {
    pub peer_id: PeerId,
    pub direction: Direction,
    /// Cancelled when the peer is torn down
    pub token: CancellationToken,
    /// Outbound queue per registered channel
    pub outbound: HashMap<ChannelId, Arc<ChannelQueue>>,
    /// Wakes the write worker when any outbound queue gains an entry
    pub wake: Arc<Notify>,
    /// First teardown reason requested from outside the workers
    reason: Mutex<Option<DisconnectReason>>,
    /// Cancelled once the slot has left the registry and Down was published
    finished: CancellationToken,
}

impl PeerSlot {
    pub fn new(
        peer_id: PeerId,
        direction: Direction,
        token: CancellationToken,
        outbound: HashMap<ChannelId, Arc<ChannelQueue>>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            peer_id,
            direction,
            token,
            outbound,
            wake,
            reason: Mutex::new(None),
            finished: CancellationToken::new(),
        }
    }

    /// Request teardown. The first reason wins; returns whether it was this one.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        let first = {
            let mut current = self.reason.lock();
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        };
        self.token.cancel();
        first
    }

    /// Reason passed to [`Self::close`], if any.
    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.reason.lock().clone()
    }

    pub fn mark_finished(&self) {
        self.finished.cancel();
    }

    /// Wait until teardown has completed.
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }

    /// Close every outbound queue and discard its entries. Returns the number dropped.
    pub fn drain_outbound(&self) -> usize {
        self.outbound.values().map(|q| q.close_and_drain()).sum()
    }
}

/// Connected peers by id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<PeerSlot>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot. On a duplicate the existing slot is kept and returned.
    pub fn insert(&self, slot: Arc<PeerSlot>) -> Result<(), Arc<PeerSlot>> {
        let mut peers = self.peers.write();
        if let Some(existing) = peers.get(&slot.peer_id) {
            return Err(existing.clone());
        }
        peers.insert(slot.peer_id, slot);
        Ok(())
    }

    pub fn remove(&self, peer_id: &PeerId) -> Option<Arc<PeerSlot>> {
        self.peers.write().remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<PeerSlot>> {
        self.peers.read().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    /// Every slot at this instant.
    pub fn snapshot(&self) -> Vec<Arc<PeerSlot>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
