//! # Peer Manager
//!
//! Thread-safe face of the [`PeerTable`]. One mutex guards every
//! transition; two `Notify`s wake the router's dial and eviction loops when a
//! transition may have unblocked them.

use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::JsonFilePeerStore;
use crate::domain::errors::{PeerManagerError, PeerStoreError, ProtocolViolation, RouterError};
use crate::domain::peer_table::{
    AcceptOutcome, PeerManagerConfig, PeerStats, PeerTable, ViolationOutcome,
};
use crate::domain::types::{Direction, DisconnectReason, PeerAddress, PeerId, PeerState};
use crate::ports::PeerStore;

/// Decides which peers to dial, accept and evict.
pub struct PeerManager {
    table: Mutex<PeerTable>,
    store: Option<Box<dyn PeerStore>>,
    dial_ready: Notify,
    evict_ready: Notify,
}

impl std::fmt::Debug for PeerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerManager")
            .field("stats", &self.stats())
            .field("persisted", &self.store.is_some())
            .finish()
    }
}

impl PeerManager {
    /// Validate `config` and load the peer store at `peer_store_path`, if any.
    pub fn new(local: PeerId, config: PeerManagerConfig) -> Result<Self, RouterError> {
        let store = config
            .peer_store_path
            .clone()
            .map(|path| Box::new(JsonFilePeerStore::new(path)) as Box<dyn PeerStore>);
        Self::build(local, config, store)
    }

    /// Use a caller-provided store instead of `peer_store_path`.
    pub fn with_store(
        local: PeerId,
        config: PeerManagerConfig,
        store: Box<dyn PeerStore>,
    ) -> Result<Self, RouterError> {
        Self::build(local, config, Some(store))
    }

    fn build(
        local: PeerId,
        config: PeerManagerConfig,
        store: Option<Box<dyn PeerStore>>,
    ) -> Result<Self, RouterError> {
        config.validate()?;
        let mut table = PeerTable::new(local, config);
        if let Some(store) = &store {
            let stored = store.load()?;
            info!(peers = stored.len(), "restored peer store");
            table.restore(&stored);
        }
        Ok(Self {
            table: Mutex::new(table),
            store,
            dial_ready: Notify::new(),
            evict_ready: Notify::new(),
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.table.lock().local_id()
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// Record a discovered peer address (persistent list, peer exchange).
    pub fn add(&self, address: PeerAddress) -> Result<bool, PeerManagerError> {
        let added = self.table.lock().add(address)?;
        if added {
            debug!(peer = %address.peer_id, endpoint = %address.endpoint, "peer added");
            self.dial_ready.notify_waiters();
        }
        Ok(added)
    }

    /// Addresses worth sharing with other peers, best first.
    pub fn advertise(&self, limit: usize) -> Vec<PeerAddress> {
        self.table.lock().advertise(limit)
    }

    // =========================================================================
    // DIALING
    // =========================================================================

    /// Next peer to dial, if one is eligible right now.
    pub fn try_dial_next(&self) -> Option<PeerAddress> {
        self.table.lock().try_dial_next(Instant::now())
    }

    /// Wait until a peer is eligible for dialing and mark it `Dialing`.
    pub async fn dial_next(&self) -> PeerAddress {
        loop {
            let notified = self.dial_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (next, wakeup) = {
                let mut table = self.table.lock();
                let now = Instant::now();
                (table.try_dial_next(now), table.next_wakeup(now))
            };
            if let Some(address) = next {
                return address;
            }

            match wakeup {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Record a failed dial. Returns the backoff before the next attempt.
    pub fn dial_failed(&self, peer: &PeerId) -> Result<Duration, PeerManagerError> {
        let delay = {
            let mut table = self.table.lock();
            let jitter = table
                .config()
                .backoff
                .sample_jitter(&mut rand::thread_rng());
            table.dial_failed(peer, Instant::now(), jitter)?
        };
        debug!(peer = %peer, backoff_ms = delay.as_millis() as u64, "dial failed");
        self.dial_ready.notify_waiters();
        Ok(delay)
    }

    /// Promote a completed outbound handshake. Exactly one of `dialed` and
    /// `accepted` succeeds for a given peer.
    pub fn dialed(&self, peer: &PeerId, remote_ip: IpAddr) -> Result<(), PeerManagerError> {
        let result = self.table.lock().dialed(peer, remote_ip, Instant::now());
        self.dial_ready.notify_waiters();
        result
    }

    /// Whether the outbound deficit disables dial throttling.
    pub fn below_min_outbound(&self) -> bool {
        self.table.lock().below_min_outbound()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Admit an inbound connection.
    pub fn accepted(&self, peer: &PeerId, remote_ip: IpAddr) -> Result<AcceptOutcome, PeerManagerError> {
        let outcome = self.table.lock().accepted(peer, remote_ip, Instant::now())?;
        match outcome {
            AcceptOutcome::AcceptedEvicting(victim) => {
                info!(
                    peer = %peer,
                    evicting = %victim,
                    "inbound at capacity, evicting lower-scored peer"
                );
                self.evict_ready.notify_waiters();
            }
            AcceptOutcome::Replacing => {
                debug!(peer = %peer, "inbound connection replaces our outbound one");
            }
            AcceptOutcome::Accepted => {}
        }
        Ok(outcome)
    }

    // =========================================================================
    // EVICTION AND TEARDOWN
    // =========================================================================

    /// Wait for the next peer to evict.
    pub async fn evict_next(&self) -> PeerId {
        loop {
            let notified = self.evict_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(peer) = self.table.lock().next_eviction() {
                return peer;
            }
            notified.await;
        }
    }

    /// Ask for a connected peer to be evicted.
    pub fn request_eviction(&self, peer: &PeerId) -> Result<(), PeerManagerError> {
        self.table.lock().request_eviction(peer)?;
        self.evict_ready.notify_waiters();
        Ok(())
    }

    /// Record the end of a live connection.
    pub fn disconnected(
        &self,
        peer: &PeerId,
        direction: Direction,
        reason: &DisconnectReason,
    ) -> Option<PeerState> {
        let state = self
            .table
            .lock()
            .disconnected(peer, direction, reason, Instant::now());
        debug!(peer = %peer, %direction, %reason, state = ?state, "peer disconnected");
        self.dial_ready.notify_waiters();
        state
    }

    // =========================================================================
    // SCORING
    // =========================================================================

    /// Penalise a protocol violation.
    pub fn report_violation(
        &self,
        peer: &PeerId,
        violation: &ProtocolViolation,
    ) -> Option<ViolationOutcome> {
        let outcome = self.table.lock().report_violation(peer, violation)?;
        if outcome.banned {
            warn!(peer = %peer, score = outcome.score, "peer banned");
        }
        Some(outcome)
    }

    /// Reward useful behaviour. Returns the new score.
    pub fn report_useful(&self, peer: &PeerId, amount: f64) -> Option<f64> {
        self.table.lock().report_useful(peer, amount)
    }

    /// Protect a peer from (or expose it to) eviction.
    pub fn set_evictable(&self, peer: &PeerId, evictable: bool) -> Result<(), PeerManagerError> {
        self.table.lock().set_evictable(peer, evictable)
    }

    /// Ban permanently, queueing a live connection for teardown.
    pub fn ban(&self, peer: &PeerId) -> Result<(), PeerManagerError> {
        let connected = self.table.lock().ban(peer)?;
        warn!(peer = %peer, "peer banned by request");
        if connected {
            self.evict_ready.notify_waiters();
        }
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn state(&self, peer: &PeerId) -> Option<PeerState> {
        self.table.lock().state(peer)
    }

    pub fn score(&self, peer: &PeerId) -> Option<f64> {
        self.table.lock().score(peer)
    }

    pub fn is_banned(&self, peer: &PeerId) -> bool {
        self.table.lock().is_banned(peer)
    }

    pub fn stats(&self) -> PeerStats {
        self.table.lock().stats()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.table.lock().connected_peers()
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Write the peer table to the store. A no-op without a store.
    pub fn save(&self) -> Result<(), PeerStoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.table.lock().snapshot();
        store.save(&snapshot)
    }
}
