//! # Channel
//!
//! A Reactor's handle on one logical stream: sends into per-peer outbound
//! queues, receives from the channel's shared inbound queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::queue::ChannelQueue;
use super::registry::PeerRegistry;
use crate::config::ChannelDescriptor;
use crate::domain::errors::{Result, RouterError};
use crate::domain::types::{ChannelId, Envelope, PeerError, PeerId};
use crate::metrics::{ChannelMetrics, RouterMetrics};

/// Per-channel state owned by the router.
#[derive(Debug)]
pub(crate) struct ChannelState {
    pub descriptor: ChannelDescriptor,
    pub inbound: Arc<ChannelQueue>,
    pub metrics: Arc<ChannelMetrics>,
}

/// Cloneable handle on a registered channel.
#[derive(Clone)]
pub struct Channel {
    state: Arc<ChannelState>,
    peers: Arc<PeerRegistry>,
    errors: mpsc::Sender<PeerError>,
    metrics: Arc<RouterMetrics>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.state.descriptor.id)
            .field("message_type", &self.state.descriptor.message_type)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        state: Arc<ChannelState>,
        peers: Arc<PeerRegistry>,
        errors: mpsc::Sender<PeerError>,
        metrics: Arc<RouterMetrics>,
    ) -> Self {
        Self {
            state,
            peers,
            errors,
            metrics,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.state.descriptor.id
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.state.descriptor
    }

    /// Entries dropped on this channel so far, inbound and outbound.
    pub fn dropped_messages(&self) -> u64 {
        self.state.metrics.dropped()
    }

    /// Entries waiting in the inbound queue.
    pub fn pending_inbound(&self) -> usize {
        self.state.inbound.len()
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Queue an envelope for one peer or, with `broadcast`, every connected peer.
    ///
    /// A full queue follows the channel's drop policy. A broadcast never fails
    /// because of one peer's queue; each per-peer loss is counted.
    pub async fn send(&self, mut envelope: Envelope) -> Result<()> {
        let start = Instant::now();
        let desc = &self.state.descriptor;

        let size = envelope.size();
        if size > desc.max_message_size {
            return Err(RouterError::MessageTooLarge {
                channel: desc.id,
                size,
                max: desc.max_message_size,
            });
        }
        envelope.channel_id = desc.id;

        let result = if envelope.broadcast {
            self.broadcast(envelope, start + desc.send_timeout).await;
            Ok(())
        } else {
            self.unicast(envelope).await
        };

        self.metrics
            .router_peer_queue_send
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn unicast(&self, envelope: Envelope) -> Result<()> {
        let to = envelope.to.ok_or(RouterError::NoDestination)?;
        let queue = self
            .peers
            .get(&to)
            .and_then(|slot| slot.outbound.get(&self.id()).cloned())
            .ok_or(RouterError::PeerNotConnected(to))?;

        // Closed if the peer is torn down while we wait
        queue
            .push(envelope, self.state.descriptor.send_timeout)
            .await
    }

    async fn broadcast(&self, envelope: Envelope, deadline: Instant) {
        for slot in self.peers.snapshot() {
            let Some(queue) = slot.outbound.get(&self.id()) else {
                continue;
            };
            let mut copy = envelope.clone();
            copy.to = Some(slot.peer_id);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = queue.push(copy, remaining).await {
                debug!(peer = %slot.peer_id, ch_id = %self.id(), error = %e, "broadcast entry dropped");
            }
        }
    }

    // =========================================================================
    // RECEIVE
    // =========================================================================

    /// Wait for the next inbound envelope. `Closed` after the router stops
    /// and the queue is drained.
    pub async fn receive(&self) -> Result<Envelope> {
        self.state.inbound.recv().await.ok_or(RouterError::Closed)
    }

    /// [`Self::receive`] bounded by `timeout`.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Envelope> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| RouterError::Timeout)?
    }

    /// Take an envelope if one is queued.
    pub fn try_receive(&self) -> Option<Envelope> {
        self.state.inbound.try_recv()
    }

    /// Wait for the next envelope from `peer`. Envelopes that arrived before
    /// a disconnect are still returned; after that, `Closed`.
    pub async fn receive_from(&self, peer: PeerId) -> Result<Envelope> {
        let from_peer = move |e: &Envelope| e.from == Some(peer);

        let token = match self.peers.get(&peer) {
            Some(slot) => slot.token.clone(),
            None => {
                return self
                    .state
                    .inbound
                    .try_recv_where(from_peer)
                    .ok_or(RouterError::Closed)
            }
        };

        tokio::select! {
            biased;
            envelope = self.state.inbound.recv_where(from_peer) => envelope,
            _ = token.cancelled() => self.state.inbound.try_recv_where(from_peer),
        }
        .ok_or(RouterError::Closed)
    }

    // =========================================================================
    // ERRORS
    // =========================================================================

    /// Report a misbehaving peer. The router penalises and disconnects it.
    pub fn report_error(&self, error: PeerError) -> Result<()> {
        self.errors.try_send(error).map_err(|e| match e {
            mpsc::error::TrySendError::Full(error) => {
                warn!(peer = %error.peer_id, ch_id = %self.id(), "peer error queue full, report dropped");
                RouterError::QueueFull { channel: self.id() }
            }
            mpsc::error::TrySendError::Closed(_) => RouterError::Closed,
        })
    }
}
