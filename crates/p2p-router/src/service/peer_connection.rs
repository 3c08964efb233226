//! # Peer Connection
//!
//! One supervisor task per connected peer plus two workers:
//!
//! - **read worker**: frame → channel tag → channel inbound queue (never blocks)
//! - **write worker**: per-channel outbound queues → weighted round-robin → frame
//!
//! The first worker to fail (or an external close) tears the peer down:
//! both workers are cancelled and joined, outbound queues are drained and
//! counted, and the PeerManager is told why.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::channel::ChannelState;
use super::peer_manager::PeerManager;
use super::queue::ChannelQueue;
use super::registry::{PeerRegistry, PeerSlot};
use crate::domain::errors::ProtocolViolation;
use crate::domain::frame::{decode_frame, encode_frame};
use crate::domain::scheduler::WeightedRoundRobin;
use crate::domain::types::{
    ChannelId, Direction, DisconnectReason, Envelope, PeerId, PeerState, PeerStatus,
    PeerUpdate,
};
use crate::metrics::{PeerChannelMetrics, RouterMetrics};
use crate::ports::Connection;

/// Shared tables every peer task needs. Frozen when the router starts.
pub(crate) struct PeerContext {
    pub channels: BTreeMap<ChannelId, Arc<ChannelState>>,
    pub registry: Arc<PeerRegistry>,
    pub peer_manager: Arc<PeerManager>,
    pub metrics: Arc<RouterMetrics>,
    pub updates: broadcast::Sender<PeerUpdate>,
    pub tracker: TaskTracker,
}

impl PeerContext {
    pub fn publish(&self, peer_id: PeerId, status: PeerStatus) {
        // no subscribers is fine
        let _ = self.updates.send(PeerUpdate { peer_id, status });
    }
}

/// Run a peer until teardown. The peer must already be `Connected` in the
/// PeerManager. A `replacing` connection takes over from a running one in the
/// other direction.
pub(crate) async fn run_peer(
    ctx: Arc<PeerContext>,
    conn: Arc<dyn Connection>,
    peer_id: PeerId,
    direction: Direction,
    replacing: bool,
    token: CancellationToken,
) {
    let wake = Arc::new(Notify::new());
    let pending = ctx.metrics.pending_send_bytes(&peer_id);

    let mut outbound = HashMap::with_capacity(ctx.channels.len());
    let mut byte_metrics = HashMap::with_capacity(ctx.channels.len());
    for (id, state) in &ctx.channels {
        let desc = &state.descriptor;
        outbound.insert(
            *id,
            Arc::new(ChannelQueue::outbound(
                *id,
                desc.capacity,
                desc.drop_policy,
                state.metrics.clone(),
                wake.clone(),
                pending.clone(),
            )),
        );
        byte_metrics.insert(*id, ctx.metrics.peer_channel(&peer_id, &state.metrics));
    }
    let byte_metrics = Arc::new(byte_metrics);

    let slot = Arc::new(PeerSlot::new(peer_id, direction, token.clone(), outbound, wake));
    if !register(&ctx, &slot, replacing).await {
        debug!(peer = %peer_id, %direction, "peer already running, closing new connection");
        conn.close().await;
        if replacing {
            // the record already names this connection
            ctx.peer_manager
                .disconnected(&peer_id, direction, &DisconnectReason::Shutdown);
        }
        return;
    }

    // evicted between admission and registration
    if ctx.peer_manager.state(&peer_id) == Some(PeerState::Disconnecting)
        && slot.close(DisconnectReason::Evicted)
    {
        ctx.metrics.router_evictions_total.inc();
    }

    ctx.metrics.peers.inc();
    info!(peer = %peer_id, %direction, endpoint = %conn.remote_endpoint(), "peer up");
    ctx.publish(peer_id, PeerStatus::Up(direction));

    let mut reader = ctx.tracker.spawn(read_worker(
        ctx.clone(),
        conn.clone(),
        peer_id,
        byte_metrics.clone(),
        token.clone(),
    ));
    let mut writer = ctx.tracker.spawn(write_worker(
        ctx.clone(),
        conn.clone(),
        slot.clone(),
        byte_metrics,
        token.clone(),
    ));

    let (worker_reason, reader_done, writer_done) = tokio::select! {
        r = &mut reader => (joined(r), true, false),
        r = &mut writer => (joined(r), false, true),
        _ = token.cancelled() => (None, false, false),
    };

    token.cancel();
    conn.close().await;
    if !reader_done {
        let _ = reader.await;
    }
    if !writer_done {
        let _ = writer.await;
    }

    let reason = worker_reason
        .or_else(|| slot.close_reason())
        .unwrap_or(DisconnectReason::Shutdown);

    // detach: no new sends can reach the peer once it leaves the registry
    ctx.registry.remove(&peer_id);
    let dropped = slot.drain_outbound();
    if dropped > 0 {
        debug!(peer = %peer_id, dropped, "discarded queued outbound messages");
    }
    ctx.metrics.peers.dec();

    if let DisconnectReason::ProtocolViolation(violation) = &reason {
        ctx.metrics.record_violation(violation.kind());
        ctx.peer_manager.report_violation(&peer_id, violation);
        warn!(peer = %peer_id, %violation, "protocol violation");
    }
    let state = ctx.peer_manager.disconnected(&peer_id, direction, &reason);
    // a replacing connection keeps the per-peer series
    if !matches!(state, Some(PeerState::Connected | PeerState::Disconnecting)) {
        ctx.metrics.forget_peer(&peer_id);
    }

    info!(peer = %peer_id, %reason, "peer down");
    ctx.publish(peer_id, PeerStatus::Down(reason));
    slot.mark_finished();
}

/// Put the slot in the registry. A replacing slot closes the running one of
/// the other direction and waits for its teardown.
async fn register(ctx: &PeerContext, slot: &Arc<PeerSlot>, replacing: bool) -> bool {
    loop {
        let existing = match ctx.registry.insert(slot.clone()) {
            Ok(()) => return true,
            Err(existing) => existing,
        };
        if !replacing || existing.direction == slot.direction {
            return false;
        }
        existing.close(DisconnectReason::Replaced);
        tokio::select! {
            biased;
            _ = slot.token.cancelled() => return false,
            _ = existing.finished() => {}
        }
    }
}

fn joined(result: Result<Option<DisconnectReason>, JoinError>) -> Option<DisconnectReason> {
    match result {
        Ok(reason) => reason,
        Err(e) => Some(DisconnectReason::Transport(format!("worker failed: {}", e))),
    }
}

// =============================================================================
// READ WORKER
// =============================================================================

/// Returns `None` when cancelled, otherwise why the connection must end.
async fn read_worker(
    ctx: Arc<PeerContext>,
    conn: Arc<dyn Connection>,
    peer_id: PeerId,
    byte_metrics: Arc<HashMap<ChannelId, PeerChannelMetrics>>,
    token: CancellationToken,
) -> Option<DisconnectReason> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            frame = conn.read_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Some(DisconnectReason::ClosedByRemote),
            Err(e) => return Some(DisconnectReason::Transport(e.to_string())),
        };

        let (channel_id, payload) = match decode_frame(frame) {
            Ok(parts) => parts,
            Err(violation) => return Some(DisconnectReason::ProtocolViolation(violation)),
        };

        let Some(state) = ctx.channels.get(&channel_id) else {
            return Some(DisconnectReason::ProtocolViolation(
                ProtocolViolation::UnknownChannel(channel_id),
            ));
        };
        if payload.len() > state.descriptor.max_message_size {
            return Some(DisconnectReason::ProtocolViolation(
                ProtocolViolation::MessageTooLarge {
                    channel: channel_id,
                    size: payload.len(),
                },
            ));
        }

        if let Some(m) = byte_metrics.get(&channel_id) {
            m.received_bytes.inc_by(payload.len() as u64);
        }

        let size = payload.len();
        let started = Instant::now();
        let kept = state
            .inbound
            .push_nonblocking(Envelope::inbound(channel_id, peer_id, payload));
        ctx.metrics
            .router_channel_queue_send
            .observe(started.elapsed().as_secs_f64());
        if !kept {
            debug!(peer = %peer_id, ch_id = %channel_id, size, "inbound queue full, message dropped");
        }
    }
}

// =============================================================================
// WRITE WORKER
// =============================================================================

/// Returns `None` when cancelled, otherwise why the connection must end.
async fn write_worker(
    ctx: Arc<PeerContext>,
    conn: Arc<dyn Connection>,
    slot: Arc<PeerSlot>,
    byte_metrics: Arc<HashMap<ChannelId, PeerChannelMetrics>>,
    token: CancellationToken,
) -> Option<DisconnectReason> {
    // slot index order = channel id order
    let lanes: Vec<(Arc<ChannelQueue>, Arc<ChannelState>)> = ctx
        .channels
        .iter()
        .filter_map(|(id, state)| Some((slot.outbound.get(id)?.clone(), state.clone())))
        .collect();
    let weights: Vec<u16> = lanes.iter().map(|(_, s)| s.descriptor.priority).collect();
    let wrr = WeightedRoundRobin::new(&weights);

    loop {
        if token.is_cancelled() {
            return None;
        }

        let mut sent_any = false;
        for &lane in wrr.round() {
            let (queue, state) = &lanes[lane];
            let Some(envelope) = queue.try_recv() else {
                continue;
            };
            sent_any = true;

            ctx.metrics
                .router_peer_queue_recv
                .observe(envelope.enqueued_at.elapsed().as_secs_f64());

            let size = envelope.payload.len();
            let frame = encode_frame(envelope.channel_id, &envelope.payload);
            // an envelope taken off the queue but never written counts as dropped
            let written = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                r = conn.write_frame(frame) => Some(r),
            };
            match written {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    state.metrics.record_drops(1);
                    return Some(DisconnectReason::Transport(e.to_string()));
                }
                None => {
                    state.metrics.record_drops(1);
                    return None;
                }
            }

            if let Some(m) = byte_metrics.get(&envelope.channel_id) {
                m.sent_bytes.inc_by(size as u64);
            }
            state.metrics.observe_message_size(size);
        }

        if !sent_any {
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = slot.wake.notified() => {}
            }
        }
    }
}
