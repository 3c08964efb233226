use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::tasks::{self, Driver};
use crate::config::{ChannelDescriptor, RouterConfig};
use crate::domain::errors::{ConfigurationError, Result};
use crate::domain::types::{ChannelId, NodeInfo, PeerAddress, PeerError, PeerId, PeerUpdate};
use crate::metrics::RouterMetrics;
use crate::ports::{PeerStore, Reactor, Transport};
use crate::service::channel::{Channel, ChannelState};
use crate::service::peer_connection::PeerContext;
use crate::service::peer_manager::PeerManager;
use crate::service::queue::ChannelQueue;
use crate::service::reactor::run_dispatcher;
use crate::service::registry::PeerRegistry;

/// Registration state, frozen by [`Router::start`].
struct Setup {
    channels: BTreeMap<ChannelId, Arc<ChannelState>>,
    reactors: Vec<(Channel, Arc<dyn Reactor>)>,
    errors_rx: Option<mpsc::Receiver<PeerError>>,
    started: bool,
}

/// Peer-to-peer message router.
///
/// Lifecycle: `new` → `open_channel`/`add_reactor` → `start` → `stop`.
pub struct Router {
    config: RouterConfig,
    local_id: PeerId,
    transport: Arc<dyn Transport>,
    metrics: Arc<RouterMetrics>,
    peer_manager: Arc<PeerManager>,
    registry: Arc<PeerRegistry>,
    updates: broadcast::Sender<PeerUpdate>,
    errors_tx: mpsc::Sender<PeerError>,
    setup: Mutex<Setup>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("local_id", &self.local_id)
            .field("network", &self.config.network)
            .field("peers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Validate `config` and build the PeerManager, loading the peer store
    /// at `peer_store_path` if one is configured.
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        metrics: RouterMetrics,
    ) -> Result<Self> {
        config.validate()?;
        let local_id = transport.local_peer_id();
        let peer_manager = PeerManager::new(local_id, config.peer_manager.clone())?;
        Ok(Self::build(config, transport, metrics, peer_manager))
    }

    /// Like [`Self::new`] with a caller-provided peer store.
    pub fn with_store(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        metrics: RouterMetrics,
        store: Box<dyn PeerStore>,
    ) -> Result<Self> {
        config.validate()?;
        let local_id = transport.local_peer_id();
        let peer_manager = PeerManager::with_store(local_id, config.peer_manager.clone(), store)?;
        Ok(Self::build(config, transport, metrics, peer_manager))
    }

    fn build(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        metrics: RouterMetrics,
        peer_manager: PeerManager,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.peer_update_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(config.error_queue_capacity);
        Self {
            local_id: peer_manager.local_id(),
            config,
            transport,
            metrics: Arc::new(metrics),
            peer_manager: Arc::new(peer_manager),
            registry: Arc::new(PeerRegistry::new()),
            updates,
            errors_tx,
            setup: Mutex::new(Setup {
                channels: BTreeMap::new(),
                reactors: Vec::new(),
                errors_rx: Some(errors_rx),
                started: false,
            }),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register a channel. Only allowed before [`Self::start`].
    pub fn open_channel(&self, descriptor: ChannelDescriptor) -> Result<Channel> {
        let mut setup = self.setup.lock();
        self.register(&mut setup, descriptor)
    }

    /// Register a channel and the Reactor that consumes it. The router
    /// drives the Reactor from a dispatcher task once started.
    pub fn add_reactor(
        &self,
        descriptor: ChannelDescriptor,
        reactor: Arc<dyn Reactor>,
    ) -> Result<Channel> {
        let mut setup = self.setup.lock();
        let channel = self.register(&mut setup, descriptor)?;
        setup.reactors.push((channel.clone(), reactor));
        Ok(channel)
    }

    fn register(&self, setup: &mut Setup, descriptor: ChannelDescriptor) -> Result<Channel> {
        let id = descriptor.id;
        if setup.started {
            return Err(ConfigurationError::RegistrationAfterStart(id).into());
        }
        if setup.channels.contains_key(&id) {
            return Err(ConfigurationError::DuplicateChannel(id).into());
        }
        descriptor.validate(self.config.max_payload_size())?;

        let metrics = Arc::new(self.metrics.channel(id, &descriptor.message_type));
        let inbound = Arc::new(ChannelQueue::new(
            id,
            descriptor.capacity,
            descriptor.drop_policy,
            metrics.clone(),
        ));
        info!(
            ch_id = %id,
            message_type = %descriptor.message_type,
            capacity = descriptor.capacity,
            priority = descriptor.priority,
            policy = ?descriptor.drop_policy,
            "channel registered"
        );
        let state = Arc::new(ChannelState {
            descriptor,
            inbound,
            metrics,
        });
        setup.channels.insert(id, state.clone());

        Ok(Channel::new(
            state,
            self.registry.clone(),
            self.errors_tx.clone(),
            self.metrics.clone(),
        ))
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Freeze the channel set and spawn the accept, dial, eviction and
    /// peer-error loops plus one dispatcher per Reactor.
    pub fn start(&self) -> Result<()> {
        let mut setup = self.setup.lock();
        if setup.started {
            return Err(ConfigurationError::AlreadyStarted.into());
        }
        setup.started = true;

        let peers = Arc::new(PeerContext {
            channels: setup.channels.clone(),
            registry: self.registry.clone(),
            peer_manager: self.peer_manager.clone(),
            metrics: self.metrics.clone(),
            updates: self.updates.clone(),
            tracker: self.tracker.clone(),
        });
        let driver = Arc::new(Driver {
            peers,
            transport: self.transport.clone(),
            config: self.config.clone(),
            node_info: node_info(self.local_id, &self.config, &setup.channels),
            token: self.token.clone(),
        });

        for (channel, reactor) in &setup.reactors {
            self.tracker.spawn(run_dispatcher(
                channel.clone(),
                reactor.clone(),
                self.updates.subscribe(),
                self.token.child_token(),
            ));
        }

        self.tracker.spawn(tasks::accept_loop(driver.clone()));
        self.tracker.spawn(tasks::dial_loop(driver.clone()));
        self.tracker.spawn(tasks::evict_loop(driver.clone()));
        if let Some(errors_rx) = setup.errors_rx.take() {
            self.tracker.spawn(tasks::error_loop(driver, errors_rx));
        }

        info!(
            peer_id = %self.local_id,
            network = %self.config.network,
            endpoint = %self.transport.local_endpoint(),
            channels = setup.channels.len(),
            reactors = setup.reactors.len(),
            "router started"
        );
        Ok(())
    }

    /// Cancel every task, close every connection and join them all.
    /// Inbound channel queues are closed afterwards, so pending `receive`
    /// calls drain what is left and then return `Closed`.
    pub async fn stop(&self) {
        self.token.cancel();
        self.transport.close().await;
        self.tracker.close();
        self.tracker.wait().await;

        let channels: Vec<_> = self.setup.lock().channels.values().cloned().collect();
        for state in channels {
            state.inbound.close();
        }

        if let Err(e) = self.peer_manager.save() {
            warn!(error = %e, "failed to save peer store");
        }
        info!(peer_id = %self.local_id, "router stopped");
    }

    // =========================================================================
    // QUERIES AND CONTROL
    // =========================================================================

    /// Peer status changes from now on.
    pub fn subscribe_peer_updates(&self) -> broadcast::Receiver<PeerUpdate> {
        self.updates.subscribe()
    }

    pub fn peer_manager(&self) -> Arc<PeerManager> {
        self.peer_manager.clone()
    }

    /// Peers with running workers, sorted.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut ids = self.registry.ids();
        ids.sort();
        ids
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_id
    }

    /// Endpoint other nodes dial to reach this router.
    pub fn local_endpoint(&self) -> std::net::SocketAddr {
        self.transport.local_endpoint()
    }

    /// Address other nodes should store for this router.
    pub fn local_address(&self) -> PeerAddress {
        PeerAddress::new(self.local_id, self.transport.local_endpoint())
    }

    /// Description sent in handshakes.
    pub fn node_info(&self) -> NodeInfo {
        node_info(self.local_id, &self.config, &self.setup.lock().channels)
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.setup.lock().started
    }

    /// Ask for a connected peer to be evicted.
    pub fn evict(&self, peer_id: &PeerId) -> Result<()> {
        self.peer_manager.request_eviction(peer_id)?;
        Ok(())
    }
}

fn node_info(
    peer_id: PeerId,
    config: &RouterConfig,
    channels: &BTreeMap<ChannelId, Arc<ChannelState>>,
) -> NodeInfo {
    NodeInfo {
        peer_id,
        network: config.network.clone(),
        channels: channels.keys().copied().collect(),
    }
}
