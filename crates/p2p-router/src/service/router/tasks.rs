//! Background loops spawned by `Router::start`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::domain::errors::{ProtocolViolation, TransportError};
use crate::domain::peer_table::AcceptOutcome;
use crate::domain::types::{Direction, DisconnectReason, NodeInfo, PeerAddress, PeerError};
use crate::ports::{Connection, Transport};
use crate::service::peer_connection::{run_peer, PeerContext};

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Everything the loops share. Built once at start.
pub(super) struct Driver {
    pub peers: Arc<PeerContext>,
    pub transport: Arc<dyn Transport>,
    pub config: RouterConfig,
    pub node_info: NodeInfo,
    pub token: CancellationToken,
}

impl Driver {
    /// Exchange NodeInfo under `handshake_timeout` and check the network.
    async fn handshake(&self, conn: &Arc<dyn Connection>) -> Result<NodeInfo, TransportError> {
        let remote = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(TransportError::Closed),
            r = tokio::time::timeout(self.config.handshake_timeout, conn.handshake(&self.node_info)) => {
                r.map_err(|_| TransportError::Timeout)??
            }
        };
        if !self.node_info.is_compatible_with(&remote) {
            return Err(TransportError::IncompatibleNetwork {
                local: self.node_info.network.clone(),
                remote: remote.network,
            });
        }
        Ok(remote)
    }

    /// Dial, handshake and verify the remote identity.
    async fn connect(&self, address: &PeerAddress) -> Result<Arc<dyn Connection>, TransportError> {
        let conn = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(TransportError::Closed),
            r = tokio::time::timeout(self.config.dial_timeout, self.transport.dial(address.endpoint)) => {
                r.map_err(|_| TransportError::Timeout)??
            }
        };

        let verified = match self.handshake(&conn).await {
            Ok(remote) if remote.peer_id == address.peer_id => Ok(()),
            Ok(remote) => Err(TransportError::IdentityMismatch {
                expected: address.peer_id,
                actual: remote.peer_id,
            }),
            Err(e) => Err(e),
        };
        match verified {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    /// Complete an inbound connection and run it if admitted.
    async fn admit(self: Arc<Self>, conn: Arc<dyn Connection>) {
        let endpoint = conn.remote_endpoint();
        let remote = match self.handshake(&conn).await {
            Ok(remote) => remote,
            Err(e) => {
                debug!(%endpoint, error = %e, "inbound handshake failed");
                conn.close().await;
                return;
            }
        };

        let peer_id = remote.peer_id;
        match self.peers.peer_manager.accepted(&peer_id, endpoint.ip()) {
            Ok(outcome) => {
                let replacing = outcome == AcceptOutcome::Replacing;
                let token = self.token.child_token();
                run_peer(
                    self.peers.clone(),
                    conn,
                    peer_id,
                    Direction::Inbound,
                    replacing,
                    token,
                )
                .await;
            }
            Err(e) => {
                debug!(peer = %peer_id, %endpoint, reason = %e, "inbound connection rejected");
                conn.close().await;
            }
        }
    }

    /// Dial one peer handed out by the PeerManager and run it if we win.
    async fn dial(self: Arc<Self>, address: PeerAddress) {
        let peer_id = address.peer_id;
        let manager = &self.peers.peer_manager;
        let metrics = &self.peers.metrics;

        let conn = match self.connect(&address).await {
            Ok(conn) => conn,
            Err(e) => {
                let outcome = match e {
                    TransportError::Timeout => "timeout",
                    _ => "failed",
                };
                metrics.record_dial(outcome);
                match manager.dial_failed(&peer_id) {
                    Ok(backoff) => debug!(
                        peer = %peer_id,
                        endpoint = %address.endpoint,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "dial failed"
                    ),
                    Err(err) => debug!(peer = %peer_id, error = %e, reason = %err, "dial failed"),
                }
                return;
            }
        };

        match manager.dialed(&peer_id, conn.remote_endpoint().ip()) {
            Ok(()) => {
                metrics.record_dial("success");
                let token = self.token.child_token();
                run_peer(
                    self.peers.clone(),
                    conn,
                    peer_id,
                    Direction::Outbound,
                    false,
                    token,
                )
                .await;
            }
            Err(e) => {
                metrics.record_dial("rejected");
                debug!(peer = %peer_id, reason = %e, "dialed connection dropped");
                conn.close().await;
            }
        }
    }
}

// =============================================================================
// LOOPS
// =============================================================================

pub(super) async fn accept_loop(driver: Arc<Driver>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = driver.token.cancelled() => break,
            r = driver.transport.accept() => r,
        };
        match accepted {
            Ok(conn) => {
                // handshakes never hold up the next accept
                driver.peers.tracker.spawn(driver.clone().admit(conn));
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::select! {
                    biased;
                    _ = driver.token.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }
    debug!("accept loop stopped");
}

pub(super) async fn dial_loop(driver: Arc<Driver>) {
    let manager = driver.peers.peer_manager.clone();
    let max_sleep_ms = driver.config.max_dial_sleep.as_millis() as u64;
    loop {
        let address = tokio::select! {
            biased;
            _ = driver.token.cancelled() => break,
            address = manager.dial_next() => address,
        };
        debug!(peer = %address.peer_id, endpoint = %address.endpoint, "dialing");
        driver.peers.tracker.spawn(driver.clone().dial(address));

        if manager.below_min_outbound() || max_sleep_ms == 0 {
            continue;
        }
        let pause = Duration::from_millis(rand::thread_rng().gen_range(0..max_sleep_ms));
        tokio::select! {
            biased;
            _ = driver.token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    debug!("dial loop stopped");
}

pub(super) async fn evict_loop(driver: Arc<Driver>) {
    let manager = driver.peers.peer_manager.clone();
    loop {
        let peer_id = tokio::select! {
            biased;
            _ = driver.token.cancelled() => break,
            peer_id = manager.evict_next() => peer_id,
        };
        match driver.peers.registry.get(&peer_id) {
            Some(slot) => {
                if slot.close(DisconnectReason::Evicted) {
                    driver.peers.metrics.router_evictions_total.inc();
                    info!(peer = %peer_id, "evicting peer");
                }
            }
            // run_peer checks for a pending eviction after registering
            None => debug!(peer = %peer_id, "eviction target not running yet"),
        }
    }
    debug!("evict loop stopped");
}

pub(super) async fn error_loop(driver: Arc<Driver>, mut errors: mpsc::Receiver<PeerError>) {
    loop {
        let error = tokio::select! {
            biased;
            _ = driver.token.cancelled() => break,
            error = errors.recv() => match error {
                Some(error) => error,
                None => break,
            },
        };

        let violation = ProtocolViolation::Reported(error.reason.clone());
        driver.peers.metrics.record_violation(violation.kind());
        let outcome = driver
            .peers
            .peer_manager
            .report_violation(&error.peer_id, &violation);
        warn!(
            peer = %error.peer_id,
            reason = %error.reason,
            score = ?outcome.as_ref().map(|o| o.score),
            "peer reported by reactor"
        );

        if let Some(slot) = driver.peers.registry.get(&error.peer_id) {
            slot.close(DisconnectReason::ReactorError(error.reason));
        }
    }
    debug!("error loop stopped");
}
