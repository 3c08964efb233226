//! Fixtures shared by the integration scenarios and benchmarks.
//!
//! Nodes run on one [`MemoryNetwork`] with `RouterConfig::for_testing`
//! unless a scenario overrides the config. Helpers panic on failure; they
//! are only meant for tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use p2p_router::{
    Channel, ChannelDescriptor, ChannelId, Connection, MemoryNetwork, NodeInfo, PeerId,
    PeerStatus, PeerUpdate, Reactor, Router, RouterConfig, RouterMetrics, Transport,
};
use tokio::sync::broadcast;

/// Upper bound for anything a scenario waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn peer_id(seed: u8) -> PeerId {
    PeerId::new([seed; 20])
}

// =============================================================================
// NODES
// =============================================================================

/// A started router plus the channels it opened.
pub struct TestNode {
    pub router: Router,
    channels: BTreeMap<ChannelId, Channel>,
}

impl TestNode {
    pub fn id(&self) -> PeerId {
        self.router.local_peer_id()
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        self.channels
            .get(&id)
            .unwrap_or_else(|| panic!("channel {} not opened on {}", id, self.id()))
    }

    pub async fn stop(&self) {
        self.router.stop().await;
    }
}

/// Builder for routers sharing one in-memory network.
#[derive(Debug, Clone)]
pub struct TestNetwork {
    network: MemoryNetwork,
    config: RouterConfig,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::for_testing())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            config,
        }
    }

    pub fn memory(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Unstarted router, for scenarios that register Reactors themselves.
    pub fn router(&self, seed: u8) -> Router {
        self.router_with(seed, self.config.clone())
    }

    pub fn router_with(&self, seed: u8, config: RouterConfig) -> Router {
        let transport = self.network.transport(peer_id(seed));
        Router::new(config, transport, RouterMetrics::nop()).expect("router config")
    }

    /// Started node with one channel per descriptor.
    pub fn node(&self, seed: u8, descriptors: &[ChannelDescriptor]) -> TestNode {
        self.node_with(seed, self.config.clone(), descriptors)
    }

    pub fn node_with(
        &self,
        seed: u8,
        config: RouterConfig,
        descriptors: &[ChannelDescriptor],
    ) -> TestNode {
        let router = self.router_with(seed, config);
        let channels = descriptors
            .iter()
            .map(|d| {
                let channel = router.open_channel(d.clone()).expect("open channel");
                (d.id, channel)
            })
            .collect();
        router.start().expect("start router");
        TestNode { router, channels }
    }

    /// Started node whose only channel is consumed by `reactor`.
    pub fn reactor_node(
        &self,
        seed: u8,
        descriptor: ChannelDescriptor,
        reactor: Arc<dyn Reactor>,
    ) -> TestNode {
        let router = self.router(seed);
        let channel = router
            .add_reactor(descriptor.clone(), reactor)
            .expect("add reactor");
        router.start().expect("start router");
        let channels = BTreeMap::from([(descriptor.id, channel)]);
        TestNode { router, channels }
    }

    /// A bare connection into `target` that completed the handshake but runs
    /// no router. Returns once `target` reports the peer up.
    pub async fn raw_peer(&self, seed: u8, target: &Router) -> Arc<dyn Connection> {
        let mut updates = target.subscribe_peer_updates();
        let conn = self.raw_connect(seed, target).await;
        wait_for(&mut updates, is_up(peer_id(seed))).await;
        conn
    }

    /// Dial and handshake without waiting for `target` to admit the peer.
    pub async fn raw_connect(&self, seed: u8, target: &Router) -> Arc<dyn Connection> {
        let transport = self.network.transport(peer_id(seed));
        let conn = transport
            .dial(target.local_endpoint())
            .await
            .expect("raw dial");
        conn.handshake(&NodeInfo {
            peer_id: peer_id(seed),
            network: target.config().network.clone(),
            channels: Vec::new(),
        })
        .await
        .expect("raw handshake");
        conn
    }
}

// =============================================================================
// WAITING
// =============================================================================

/// Next update matching `pred`, skipping the rest.
pub async fn wait_for<F>(updates: &mut broadcast::Receiver<PeerUpdate>, pred: F) -> PeerUpdate
where
    F: Fn(&PeerUpdate) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("peer updates closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for peer update")
}

pub fn is_up(peer: PeerId) -> impl Fn(&PeerUpdate) -> bool {
    move |u: &PeerUpdate| u.peer_id == peer && matches!(u.status, PeerStatus::Up(_))
}

pub fn is_down(peer: PeerId) -> impl Fn(&PeerUpdate) -> bool {
    move |u: &PeerUpdate| u.peer_id == peer && matches!(u.status, PeerStatus::Down(_))
}

/// Poll `cond` until it holds.
pub async fn eventually<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    let polled = tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}

/// Have `a` dial `b` and wait until both report the link up.
pub async fn connect(a: &TestNode, b: &TestNode) {
    let mut a_updates = a.router.subscribe_peer_updates();
    let mut b_updates = b.router.subscribe_peer_updates();
    a.router
        .peer_manager()
        .add(b.router.local_address())
        .expect("add peer");
    wait_for(&mut a_updates, is_up(b.id())).await;
    wait_for(&mut b_updates, is_up(a.id())).await;
}
