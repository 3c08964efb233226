//! Peer records, scoring and eviction ordering.
//!
//! SECURITY-CRITICAL: decides who gets banned and who gets displaced.

use std::cmp::Ordering;
use std::net::{IpAddr, SocketAddr};

use tokio::time::Instant;

use super::config::ScoreConfig;
use super::types::StoredPeer;
use crate::domain::errors::ProtocolViolation;
use crate::domain::types::{Direction, PeerId, PeerState};

/// Everything the table knows about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Dialable endpoint; unknown for peers only ever seen inbound
    pub endpoint: Option<SocketAddr>,
    pub persistent: bool,
    pub state: PeerState,
    /// Direction of the live connection
    pub direction: Option<Direction>,
    /// Address counted against IP and subnet limits while dialing or connected
    pub remote_ip: Option<IpAddr>,
    pub score: f64,
    /// Cleared by Reactors to protect a peer from eviction
    pub evictable: bool,
    pub banned: bool,
    /// An outbound dial is in flight (may overlap an inbound Connected)
    pub dial_in_flight: bool,
    pub dial_failures: u32,
    pub next_dial_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub connected_at: Option<Instant>,
}

impl PeerRecord {
    pub fn new(
        peer_id: PeerId,
        endpoint: Option<SocketAddr>,
        persistent: bool,
        scoring: &ScoreConfig,
    ) -> Self {
        Self {
            peer_id,
            endpoint,
            persistent,
            state: PeerState::Stored,
            direction: None,
            remote_ip: None,
            score: scoring.initial,
            evictable: true,
            banned: false,
            dial_in_flight: false,
            dial_failures: 0,
            next_dial_at: None,
            cooldown_until: None,
            connected_at: None,
        }
    }

    /// Rebuild a record from the peer store.
    pub fn restore(stored: &StoredPeer, scoring: &ScoreConfig) -> Self {
        let mut record = Self::new(stored.peer_id, stored.endpoint, stored.persistent, scoring);
        record.score = stored.score.clamp(scoring.min, scoring.max);
        record.banned = stored.banned;
        if record.banned {
            record.state = PeerState::Evicted;
        }
        record
    }

    pub fn snapshot(&self) -> StoredPeer {
        StoredPeer {
            peer_id: self.peer_id,
            endpoint: self.endpoint,
            persistent: self.persistent,
            score: self.score,
            banned: self.banned,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    /// Whether this record holds an IP/subnet slot.
    pub fn occupies_slot(&self) -> bool {
        self.dial_in_flight
            || matches!(self.state, PeerState::Connected | PeerState::Disconnecting)
    }

    /// Whether the dial loop may pick this peer now.
    pub fn is_dialable(&self, now: Instant) -> bool {
        self.state == PeerState::Stored
            && !self.banned
            && !self.dial_in_flight
            && self.endpoint.is_some()
            && self.next_dial_at.map_or(true, |at| at <= now)
    }

    /// Whether this peer may be displaced or manager-evicted.
    pub fn is_eviction_candidate(&self) -> bool {
        self.is_connected() && self.evictable && !self.persistent
    }

    /// Apply `delta` within bounds, returning the new score.
    pub fn adjust_score(&mut self, delta: f64, scoring: &ScoreConfig) -> f64 {
        self.score = (self.score + delta).clamp(scoring.min, scoring.max);
        self.score
    }

    /// Reset connection-scoped fields after a teardown or failed dial.
    pub fn clear_link(&mut self) {
        self.direction = None;
        self.remote_ip = None;
        self.connected_at = None;
    }
}

/// Score penalty for a violation.
pub fn violation_penalty(violation: &ProtocolViolation, scoring: &ScoreConfig) -> f64 {
    match violation {
        ProtocolViolation::MalformedFrame { .. } => scoring.malformed_frame_penalty,
        ProtocolViolation::UnknownChannel(_) => scoring.unknown_channel_penalty,
        ProtocolViolation::MessageTooLarge { .. } => scoring.oversized_message_penalty,
        ProtocolViolation::Reported(_) => scoring.reported_penalty,
    }
}

/// Eviction order: lowest score first, ties broken by most recent connection.
pub fn eviction_order(a: &PeerRecord, b: &PeerRecord) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.connected_at.cmp(&a.connected_at))
}

/// Dial preference: persistent first, then score, then fewest failures.
pub fn dial_order(a: &PeerRecord, b: &PeerRecord) -> Ordering {
    b.persistent
        .cmp(&a.persistent)
        .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        .then_with(|| a.dial_failures.cmp(&b.dial_failures))
}
