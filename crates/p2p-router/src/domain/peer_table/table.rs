//! Peer table state machine.
//!
//! Every method is a complete transition; the service layer holds one lock
//! around the table so check-then-act sequences cannot interleave.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;

use super::config::PeerManagerConfig;
use super::security::{dial_order, eviction_order, violation_penalty, PeerRecord};
use super::types::{AcceptOutcome, PeerStats, StoredPeer, ViolationOutcome};
use crate::domain::errors::{PeerManagerError, ProtocolViolation};
use crate::domain::subnet::SubnetKey;
use crate::domain::types::{Direction, DisconnectReason, PeerAddress, PeerId, PeerState};

/// Known peers and their lifecycle state.
#[derive(Debug)]
pub struct PeerTable {
    local: PeerId,
    config: PeerManagerConfig,
    peers: HashMap<PeerId, PeerRecord>,
    /// Peers in `Disconnecting` awaiting teardown by the Router
    eviction_queue: VecDeque<PeerId>,
}

impl PeerTable {
    /// Create a table seeded with the configured persistent peers.
    pub fn new(local: PeerId, config: PeerManagerConfig) -> Self {
        let mut peers = HashMap::new();
        for addr in &config.persistent_peers {
            if addr.peer_id == local {
                continue;
            }
            peers.insert(
                addr.peer_id,
                PeerRecord::new(addr.peer_id, Some(addr.endpoint), true, &config.scoring),
            );
        }
        Self {
            local,
            config,
            peers,
            eviction_queue: VecDeque::new(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn config(&self) -> &PeerManagerConfig {
        &self.config
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// Record a discovered address. Returns true when a new record was created.
    pub fn add(&mut self, address: PeerAddress) -> Result<bool, PeerManagerError> {
        if address.peer_id == self.local {
            return Err(PeerManagerError::SelfConnection);
        }

        if let Some(record) = self.peers.get_mut(&address.peer_id) {
            if record.endpoint.is_none() || address.persistent {
                record.endpoint = Some(address.endpoint);
            }
            record.persistent |= address.persistent;
            return Ok(false);
        }

        if self.peers.len() >= self.config.max_stored_peers && !self.make_room() {
            return Ok(false);
        }

        self.peers.insert(
            address.peer_id,
            PeerRecord::new(
                address.peer_id,
                Some(address.endpoint),
                address.persistent,
                &self.config.scoring,
            ),
        );
        Ok(true)
    }

    /// Drop the worst idle, non-persistent record to make space.
    fn make_room(&mut self) -> bool {
        let victim = self
            .peers
            .values()
            .filter(|r| r.state == PeerState::Stored && !r.persistent && !r.occupies_slot())
            .min_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.dial_failures.cmp(&a.dial_failures))
            })
            .map(|r| r.peer_id);

        match victim {
            Some(id) => {
                self.peers.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Merge records loaded from the peer store.
    pub fn restore(&mut self, stored: &[StoredPeer]) {
        for entry in stored {
            if entry.peer_id == self.local {
                continue;
            }
            match self.peers.get_mut(&entry.peer_id) {
                Some(record) => {
                    record.score = entry.score.clamp(self.config.scoring.min, self.config.scoring.max);
                    if entry.banned {
                        record.banned = true;
                        record.state = PeerState::Evicted;
                    }
                    if record.endpoint.is_none() {
                        record.endpoint = entry.endpoint;
                    }
                }
                None => {
                    if self.peers.len() >= self.config.max_stored_peers {
                        continue;
                    }
                    self.peers
                        .insert(entry.peer_id, PeerRecord::restore(entry, &self.config.scoring));
                }
            }
        }
    }

    /// Persistable view of every record, ordered by id.
    pub fn snapshot(&self) -> Vec<StoredPeer> {
        let mut out: Vec<_> = self.peers.values().map(PeerRecord::snapshot).collect();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    // =========================================================================
    // COUNTS AND LIMITS
    // =========================================================================

    fn count_connected(&self, direction: Direction) -> usize {
        self.peers
            .values()
            .filter(|r| r.is_connected() && r.direction == Some(direction))
            .count()
    }

    fn dialing_count(&self) -> usize {
        self.peers.values().filter(|r| r.dial_in_flight).count()
    }

    /// Outbound connections plus in-flight dials are below `min_outbound`.
    pub fn below_min_outbound(&self) -> bool {
        self.count_connected(Direction::Outbound) + self.dialing_count() < self.config.min_outbound
    }

    fn check_ip_limits(&self, ip: IpAddr, exclude: PeerId) -> Result<(), PeerManagerError> {
        let subnet = SubnetKey::from_ip(&ip);
        let mut same_ip = 0;
        let mut same_subnet = 0;
        for record in self.peers.values() {
            if record.peer_id == exclude || !record.occupies_slot() {
                continue;
            }
            if let Some(other) = record.remote_ip {
                if other == ip {
                    same_ip += 1;
                }
                if SubnetKey::from_ip(&other) == subnet {
                    same_subnet += 1;
                }
            }
        }
        if same_ip >= self.config.max_peers_per_ip {
            return Err(PeerManagerError::IpLimit(ip));
        }
        if same_subnet >= self.config.max_peers_per_subnet {
            return Err(PeerManagerError::SubnetLimit(ip));
        }
        Ok(())
    }

    fn expire_cooldowns(&mut self, now: Instant) {
        for record in self.peers.values_mut() {
            if record.state == PeerState::Evicted
                && !record.banned
                && record.cooldown_until.map_or(true, |until| until <= now)
            {
                record.state = PeerState::Stored;
                record.cooldown_until = None;
            }
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Pick the next peer to dial and mark it `Dialing`.
    pub fn try_dial_next(&mut self, now: Instant) -> Option<PeerAddress> {
        self.expire_cooldowns(now);

        let dialing = self.dialing_count();
        if dialing >= self.config.max_concurrent_dials {
            return None;
        }
        if dialing + self.count_connected(Direction::Outbound) >= self.config.max_outbound {
            return None;
        }

        let chosen = self
            .peers
            .values()
            .filter(|r| r.is_dialable(now))
            .filter(|r| {
                r.endpoint
                    .map_or(false, |ep| self.check_ip_limits(ep.ip(), r.peer_id).is_ok())
            })
            .min_by(|a, b| dial_order(a, b))
            .map(|r| r.peer_id)?;

        let record = self.peers.get_mut(&chosen)?;
        let endpoint = record.endpoint?;
        record.state = PeerState::Dialing;
        record.dial_in_flight = true;
        record.direction = Some(Direction::Outbound);
        record.remote_ip = Some(endpoint.ip());

        Some(PeerAddress {
            peer_id: chosen,
            endpoint,
            persistent: record.persistent,
        })
    }

    /// Earliest instant at which a currently blocked peer becomes dialable.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        self.peers
            .values()
            .filter(|r| !r.banned && r.endpoint.is_some() && !r.dial_in_flight)
            .filter_map(|r| match r.state {
                PeerState::Stored => r.next_dial_at.filter(|at| *at > now),
                PeerState::Evicted => r.cooldown_until,
                _ => None,
            })
            .min()
    }

    /// Record a failed dial and schedule the retry. Returns the backoff delay.
    pub fn dial_failed(
        &mut self,
        peer: &PeerId,
        now: Instant,
        jitter: Duration,
    ) -> Result<Duration, PeerManagerError> {
        let backoff = self.config.backoff.clone();
        let record = self
            .peers
            .get_mut(peer)
            .ok_or(PeerManagerError::UnknownPeer(*peer))?;
        if !record.dial_in_flight {
            return Err(PeerManagerError::NotDialing(*peer));
        }
        record.dial_in_flight = false;

        if record.state != PeerState::Dialing {
            // an inbound connection won the race; nothing to back off from
            return Ok(Duration::ZERO);
        }

        record.dial_failures = record.dial_failures.saturating_add(1);
        let delay = backoff.delay(record.dial_failures, jitter);
        record.next_dial_at = Some(now + delay);
        record.state = if record.banned {
            PeerState::Evicted
        } else {
            PeerState::Stored
        };
        record.clear_link();
        Ok(delay)
    }

    /// Promote a completed outbound handshake to `Connected`.
    pub fn dialed(
        &mut self,
        peer: &PeerId,
        remote_ip: IpAddr,
        now: Instant,
    ) -> Result<(), PeerManagerError> {
        let record = self
            .peers
            .get_mut(peer)
            .ok_or(PeerManagerError::UnknownPeer(*peer))?;
        if !record.dial_in_flight {
            return Err(PeerManagerError::NotDialing(*peer));
        }
        record.dial_in_flight = false;

        if record.banned {
            if record.state == PeerState::Dialing {
                record.state = PeerState::Evicted;
                record.clear_link();
            }
            return Err(PeerManagerError::Banned(*peer));
        }

        match record.state {
            PeerState::Dialing => {
                record.state = PeerState::Connected;
                record.direction = Some(Direction::Outbound);
                record.remote_ip = Some(remote_ip);
                record.connected_at = Some(now);
                record.dial_failures = 0;
                record.next_dial_at = None;
                Ok(())
            }
            PeerState::Connected | PeerState::Disconnecting
                if record.direction == Some(Direction::Inbound) =>
            {
                Err(PeerManagerError::DialRace(*peer))
            }
            PeerState::Connected | PeerState::Disconnecting => {
                Err(PeerManagerError::AlreadyConnected(*peer))
            }
            PeerState::Evicted => Err(PeerManagerError::CoolingDown(*peer)),
            PeerState::Stored => Err(PeerManagerError::NotDialing(*peer)),
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Admit an inbound connection, displacing a worse inbound peer at capacity.
    pub fn accepted(
        &mut self,
        peer: &PeerId,
        remote_ip: IpAddr,
        now: Instant,
    ) -> Result<AcceptOutcome, PeerManagerError> {
        if *peer == self.local {
            return Err(PeerManagerError::SelfConnection);
        }
        self.expire_cooldowns(now);

        let newcomer_score = match self.peers.get_mut(peer) {
            Some(record) => {
                if record.banned {
                    return Err(PeerManagerError::Banned(*peer));
                }
                match record.state {
                    PeerState::Evicted => return Err(PeerManagerError::CoolingDown(*peer)),
                    // both dials completed: the link initiated by the lower id survives
                    PeerState::Connected
                        if record.direction == Some(Direction::Outbound) && self.local > *peer =>
                    {
                        record.direction = Some(Direction::Inbound);
                        record.remote_ip = Some(remote_ip);
                        record.connected_at = Some(now);
                        return Ok(AcceptOutcome::Replacing);
                    }
                    PeerState::Connected | PeerState::Disconnecting => {
                        return Err(PeerManagerError::AlreadyConnected(*peer))
                    }
                    // simultaneous dial: the connection initiated by the lower id survives
                    PeerState::Dialing if self.local < *peer => {
                        return Err(PeerManagerError::DialRace(*peer))
                    }
                    PeerState::Dialing | PeerState::Stored => {}
                }
                record.score
            }
            None => self.config.scoring.initial,
        };

        self.check_ip_limits(remote_ip, *peer)?;

        let mut outcome = AcceptOutcome::Accepted;
        if self.count_connected(Direction::Inbound) >= self.config.max_inbound {
            let victim = self
                .peers
                .values()
                .filter(|r| r.direction == Some(Direction::Inbound) && r.is_eviction_candidate())
                .min_by(|a, b| eviction_order(a, b))
                .filter(|r| r.score < newcomer_score)
                .map(|r| r.peer_id);

            match victim {
                Some(victim) => {
                    self.mark_disconnecting(&victim);
                    outcome = AcceptOutcome::AcceptedEvicting(victim);
                }
                None => return Err(PeerManagerError::InboundCapacity(self.config.max_inbound)),
            }
        }

        if !self.peers.contains_key(peer) {
            if self.peers.len() >= self.config.max_stored_peers {
                self.make_room();
            }
            self.peers.insert(
                *peer,
                PeerRecord::new(*peer, None, false, &self.config.scoring),
            );
        }
        if let Some(record) = self.peers.get_mut(peer) {
            record.state = PeerState::Connected;
            record.direction = Some(Direction::Inbound);
            record.remote_ip = Some(remote_ip);
            record.connected_at = Some(now);
        }
        Ok(outcome)
    }

    // =========================================================================
    // TEARDOWN AND EVICTION
    // =========================================================================

    fn mark_disconnecting(&mut self, peer: &PeerId) {
        if let Some(record) = self.peers.get_mut(peer) {
            if record.state == PeerState::Connected {
                record.state = PeerState::Disconnecting;
                self.eviction_queue.push_back(*peer);
            }
        }
    }

    /// Queue a connected peer for manager-issued eviction.
    pub fn request_eviction(&mut self, peer: &PeerId) -> Result<(), PeerManagerError> {
        let record = self
            .peers
            .get(peer)
            .ok_or(PeerManagerError::UnknownPeer(*peer))?;
        match record.state {
            PeerState::Connected => {
                self.mark_disconnecting(peer);
                Ok(())
            }
            PeerState::Disconnecting => Ok(()),
            _ => Err(PeerManagerError::NotConnected(*peer)),
        }
    }

    /// Pop the next peer awaiting eviction.
    pub fn next_eviction(&mut self) -> Option<PeerId> {
        while let Some(peer) = self.eviction_queue.pop_front() {
            if self.state(&peer) == Some(PeerState::Disconnecting) {
                return Some(peer);
            }
        }
        None
    }

    /// Record the end of the live connection in `direction`. Returns the
    /// resulting state. The end of a link already replaced by one in the other
    /// direction leaves the record untouched.
    pub fn disconnected(
        &mut self,
        peer: &PeerId,
        direction: Direction,
        reason: &DisconnectReason,
        now: Instant,
    ) -> Option<PeerState> {
        let cooldown = self.config.eviction_cooldown;
        let record = self.peers.get_mut(peer)?;
        if !matches!(record.state, PeerState::Connected | PeerState::Disconnecting)
            || record.direction != Some(direction)
        {
            return Some(record.state);
        }
        self.eviction_queue.retain(|p| p != peer);

        record.clear_link();
        record.state = if record.banned {
            PeerState::Evicted
        } else if reason.is_punitive() && !record.persistent {
            record.cooldown_until = Some(now + cooldown);
            PeerState::Evicted
        } else if record.dial_in_flight {
            // our own dial is still running and may take over
            record.direction = Some(Direction::Outbound);
            record.remote_ip = record.endpoint.map(|ep| ep.ip());
            PeerState::Dialing
        } else {
            PeerState::Stored
        };
        Some(record.state)
    }

    // =========================================================================
    // SCORING
    // =========================================================================

    /// Penalise a protocol violation, banning at the threshold.
    pub fn report_violation(
        &mut self,
        peer: &PeerId,
        violation: &ProtocolViolation,
    ) -> Option<ViolationOutcome> {
        let scoring = self.config.scoring.clone();
        let record = self.peers.get_mut(peer)?;
        let score = record.adjust_score(-violation_penalty(violation, &scoring), &scoring);
        let newly_banned = !record.banned && score <= scoring.ban_threshold;
        if newly_banned {
            record.banned = true;
        }
        Some(ViolationOutcome {
            score,
            banned: record.banned,
            connected: matches!(record.state, PeerState::Connected | PeerState::Disconnecting),
        })
    }

    /// Reward useful behaviour.
    pub fn report_useful(&mut self, peer: &PeerId, amount: f64) -> Option<f64> {
        let scoring = &self.config.scoring;
        let record = self.peers.get_mut(peer)?;
        if !amount.is_finite() {
            return Some(record.score);
        }
        Some(record.adjust_score(amount.abs(), scoring))
    }

    pub fn set_evictable(&mut self, peer: &PeerId, evictable: bool) -> Result<(), PeerManagerError> {
        let record = self
            .peers
            .get_mut(peer)
            .ok_or(PeerManagerError::UnknownPeer(*peer))?;
        record.evictable = evictable;
        Ok(())
    }

    /// Ban a peer permanently. Returns true when a live connection must be torn down.
    pub fn ban(&mut self, peer: &PeerId) -> Result<bool, PeerManagerError> {
        if *peer == self.local {
            return Err(PeerManagerError::SelfConnection);
        }
        if !self.peers.contains_key(peer) {
            self.peers.insert(
                *peer,
                PeerRecord::new(*peer, None, false, &self.config.scoring),
            );
        }
        let min = self.config.scoring.min;
        let record = self
            .peers
            .get_mut(peer)
            .ok_or(PeerManagerError::UnknownPeer(*peer))?;
        record.banned = true;
        record.score = min;
        match record.state {
            PeerState::Connected => {
                self.mark_disconnecting(peer);
                Ok(true)
            }
            PeerState::Disconnecting => Ok(true),
            // a pending dial is resolved by dialed/dial_failed
            PeerState::Dialing => Ok(false),
            PeerState::Stored | PeerState::Evicted => {
                record.state = PeerState::Evicted;
                Ok(false)
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn state(&self, peer: &PeerId) -> Option<PeerState> {
        self.peers.get(peer).map(|r| r.state)
    }

    pub fn score(&self, peer: &PeerId) -> Option<f64> {
        self.peers.get(peer).map(|r| r.score)
    }

    pub fn record(&self, peer: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer)
    }

    pub fn is_banned(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).map_or(false, |r| r.banned)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|r| r.is_connected())
            .map(|r| r.peer_id)
            .collect()
    }

    pub fn stats(&self) -> PeerStats {
        let mut stats = PeerStats::default();
        for record in self.peers.values() {
            if record.banned {
                stats.banned += 1;
            }
            if record.dial_in_flight {
                stats.dialing += 1;
            }
            match (record.state, record.direction) {
                (PeerState::Stored, _) => stats.stored += 1,
                (PeerState::Connected, Some(Direction::Inbound)) => stats.inbound += 1,
                (PeerState::Connected, _) => stats.outbound += 1,
                (PeerState::Disconnecting, _) => stats.disconnecting += 1,
                (PeerState::Evicted, _) => stats.evicted += 1,
                (PeerState::Dialing, _) => {}
            }
        }
        stats
    }

    /// Dialable addresses worth sharing with other peers, best first.
    pub fn advertise(&self, limit: usize) -> Vec<PeerAddress> {
        let mut candidates: Vec<_> = self
            .peers
            .values()
            .filter(|r| !r.banned && r.state != PeerState::Evicted)
            .filter_map(|r| {
                r.endpoint
                    .map(|endpoint| (r.score, PeerAddress::new(r.peer_id, endpoint)))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates.into_iter().take(limit).map(|(_, a)| a).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
