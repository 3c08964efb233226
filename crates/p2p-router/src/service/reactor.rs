//! Reactor dispatcher: one task per registered Reactor.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::Channel;
use crate::domain::types::{PeerStatus, PeerUpdate};
use crate::ports::Reactor;

/// Feed a Reactor its peer updates and inbound envelopes until cancelled.
///
/// Peer updates are polled first so a Reactor learns about a peer before
/// handling envelopes queued behind the update.
pub(crate) async fn run_dispatcher(
    channel: Channel,
    reactor: Arc<dyn Reactor>,
    mut updates: broadcast::Receiver<PeerUpdate>,
    token: CancellationToken,
) {
    let ch_id = channel.id();
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            update = updates.recv() => match update {
                Ok(PeerUpdate { peer_id, status: PeerStatus::Up(direction) }) => {
                    reactor.on_peer_up(peer_id, direction).await;
                }
                Ok(PeerUpdate { peer_id, status: PeerStatus::Down(reason) }) => {
                    reactor.on_peer_down(peer_id, reason).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%ch_id, skipped, "reactor fell behind on peer updates");
                }
                Err(RecvError::Closed) => break,
            },
            envelope = channel.receive() => match envelope {
                Ok(envelope) => reactor.on_message(envelope, &channel).await,
                Err(_) => break,
            },
        }
    }
    debug!(%ch_id, "reactor dispatcher stopped");
}
