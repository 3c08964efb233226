//! # Peer Lifecycle Scenarios
//!
//! Admission and teardown across several routers:
//!
//! 1. **Dial races**: two nodes dialing each other end up with one link
//! 2. **Backoff**: an unreachable peer is retried with growing delays
//! 3. **Violations**: repeated protocol violations end in a permanent ban
//! 4. **Eviction and capacity**: evicted peers cool down, full nodes refuse
//! 5. **Persistence**: scores, bans and addresses survive a restart
//! 6. **Telemetry**: router metrics show up in the exported registry

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use bytes::Bytes;

    use p2p_router::{
        ChannelDescriptor, ChannelId, ConfigurationError, DisconnectReason, PeerAddress,
        PeerState, PeerStatus, Router, RouterConfig, RouterError, RouterMetrics,
    };

    use crate::harness::{
        connect, eventually, is_down, is_up, peer_id, wait_for, TestNetwork, WAIT,
    };

    const CH: ChannelId = ChannelId(0x20);

    fn vote() -> ChannelDescriptor {
        ChannelDescriptor::new(CH, "vote")
    }

    // =========================================================================
    // DIALING
    // =========================================================================

    #[tokio::test]
    async fn test_simultaneous_dial_leaves_one_connection() {
        let net = TestNetwork::new();
        let a = net.node(1, &[vote()]);
        let b = net.node(2, &[vote()]);

        a.router.peer_manager().add(b.router.local_address()).unwrap();
        b.router.peer_manager().add(a.router.local_address()).unwrap();

        let linked = || {
            a.router.connected_peers() == vec![b.id()]
                && b.router.connected_peers() == vec![a.id()]
        };
        eventually("a single link", linked).await;

        // settled: no second connection appears later
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(linked());
        assert_eq!(a.router.peer_manager().stats().connected(), 1);
        assert_eq!(b.router.peer_manager().stats().connected(), 1);

        a.channel(CH)
            .send(p2p_router::Envelope::to_peer(b.id(), &b"still works"[..]))
            .await
            .unwrap();
        let got = b.channel(CH).receive_timeout(WAIT).await.unwrap();
        assert_eq!(got.from, Some(a.id()));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_retried_with_backoff() {
        let net = TestNetwork::new();
        let node = net.node(1, &[vote()]);
        let nowhere: SocketAddr = "10.200.0.1:26656".parse().unwrap();
        let ghost = peer_id(7);
        node.router
            .peer_manager()
            .add(PeerAddress::new(ghost, nowhere))
            .unwrap();

        let failed = || {
            node.router
                .metrics()
                .router_dial_attempts_total
                .with_label_values(&["failed"])
                .get()
        };
        eventually("first failed dial", || failed() >= 1).await;

        // base 100ms doubling: a handful of attempts per second, not hundreds
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let attempts = failed();
        assert!((2..=8).contains(&attempts), "{} dial attempts", attempts);

        assert_ne!(node.router.peer_manager().state(&ghost), Some(PeerState::Connected));
        assert!(!node.router.peer_manager().is_banned(&ghost));
        assert!(node.router.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_peer_redialled_after_restart() {
        let net = TestNetwork::new();
        let b = net.node(2, &[vote()]);
        let b_address = b.router.local_address();

        let mut config = net.config().clone();
        config.peer_manager.persistent_peers =
            vec![PeerAddress::persistent(b_address.peer_id, b_address.endpoint)];
        let a = net.node_with(1, config, &[vote()]);
        let mut updates = a.router.subscribe_peer_updates();

        wait_for(&mut updates, is_up(b.id())).await;
        b.stop().await;
        wait_for(&mut updates, is_down(b.id())).await;

        // same identity back at the same endpoint
        let transport = net.memory().transport_at(peer_id(2), b_address.endpoint);
        let b2 = Router::new(net.config().clone(), transport, RouterMetrics::nop()).unwrap();
        b2.open_channel(vote()).unwrap();
        b2.start().unwrap();

        wait_for(&mut updates, is_up(b2.local_peer_id())).await;
        assert_eq!(a.router.connected_peers(), vec![b2.local_peer_id()]);
        b2.stop().await;
    }

    // =========================================================================
    // VIOLATIONS
    // =========================================================================

    #[tokio::test]
    async fn test_repeated_violations_end_in_ban() {
        let mut config = RouterConfig::for_testing();
        config.peer_manager.eviction_cooldown = Duration::from_millis(10);
        let net = TestNetwork::with_config(config);
        let node = net.node(1, &[vote()]);
        let offender = peer_id(9);

        let mut attempts = 0;
        while !node.router.peer_manager().is_banned(&offender) {
            attempts += 1;
            assert!(attempts <= 20, "offender never banned");

            let conn = net.raw_connect(9, &node.router).await;
            // shorter than the channel tag
            let _ = conn.write_frame(Bytes::from_static(&[0x01])).await;
            // the router hangs up either way: violation, cool-down or ban
            while let Ok(Ok(Some(_))) = tokio::time::timeout(WAIT, conn.read_frame()).await {}
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let violations = node
            .router
            .metrics()
            .router_protocol_violations_total
            .with_label_values(&["malformed_frame"])
            .get();
        // default scoring: 20 per malformed frame, ban at -50
        assert_eq!(violations, 3);
        assert_eq!(node.router.peer_manager().state(&offender), Some(PeerState::Evicted));

        // a banned peer is turned away after the handshake
        let mut updates = node.router.subscribe_peer_updates();
        let conn = net.raw_connect(9, &node.router).await;
        let closed = tokio::time::timeout(WAIT, conn.read_frame()).await.unwrap();
        assert!(matches!(closed, Ok(None)));
        assert!(updates.try_recv().is_err());
        assert!(node.router.connected_peers().is_empty());
    }

    // =========================================================================
    // EVICTION AND CAPACITY
    // =========================================================================

    #[tokio::test]
    async fn test_evicted_peer_is_not_redialled_during_cooldown() {
        let net = TestNetwork::new();
        let a = net.node(1, &[vote()]);
        let b = net.node(2, &[vote()]);
        connect(&a, &b).await;

        let mut updates = a.router.subscribe_peer_updates();
        a.router.evict(&b.id()).unwrap();
        let down = wait_for(&mut updates, is_down(b.id())).await;
        assert_eq!(down.status, PeerStatus::Down(DisconnectReason::Evicted));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(a.router.connected_peers().is_empty());
        assert_eq!(a.router.peer_manager().state(&b.id()), Some(PeerState::Evicted));
        assert_eq!(a.router.metrics().router_evictions_total.get(), 1);
    }

    #[tokio::test]
    async fn test_inbound_capacity_refuses_extra_peers() {
        let net = TestNetwork::new();
        let node = net.node(1, &[vote()]);
        let max_inbound = net.config().peer_manager.max_inbound;

        let mut held = Vec::new();
        for seed in 0..max_inbound as u8 {
            held.push(net.raw_peer(10 + seed, &node.router).await);
        }
        assert_eq!(node.router.connected_peers().len(), max_inbound);

        let extra = net.raw_connect(99, &node.router).await;
        let closed = tokio::time::timeout(WAIT, extra.read_frame()).await.unwrap();
        assert!(matches!(closed, Ok(None)));
        assert_eq!(node.router.connected_peers().len(), max_inbound);
        assert!(!node.router.connected_peers().contains(&peer_id(99)));
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    #[tokio::test]
    async fn test_invalid_setup_fails_before_start() {
        let net = TestNetwork::new();

        let mut config = RouterConfig::for_testing();
        config.peer_manager.min_outbound = config.peer_manager.max_outbound + 1;
        let transport = net.memory().transport(peer_id(1));
        assert!(matches!(
            Router::new(config, transport, RouterMetrics::nop()),
            Err(RouterError::Configuration(ConfigurationError::Invalid(_)))
        ));

        let router = net.router(2);
        let too_big = router.config().max_payload_size() + 1;
        assert!(matches!(
            router.open_channel(vote().with_max_message_size(too_big)),
            Err(RouterError::Configuration(ConfigurationError::Invalid(_)))
        ));
        assert!(matches!(
            router.open_channel(vote().with_capacity(0)),
            Err(RouterError::Configuration(ConfigurationError::InvalidCapacity(CH)))
        ));
        router.open_channel(vote()).unwrap();
        router.start().unwrap();
        assert!(matches!(
            router.open_channel(ChannelDescriptor::new(ChannelId(0x21), "late")),
            Err(RouterError::Configuration(ConfigurationError::RegistrationAfterStart(_)))
        ));
        router.stop().await;
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    #[tokio::test]
    async fn test_peer_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let net = TestNetwork::new();
        // only a persists; b keeps the default in-memory table
        let mut config = net.config().clone();
        config.peer_manager.peer_store_path = Some(dir.path().join("peers.json"));

        let a = net.node_with(1, config.clone(), &[vote()]);
        let b = net.node(2, &[vote()]);
        let c_address = PeerAddress::new(peer_id(3), "10.200.0.3:26656".parse().unwrap());
        connect(&a, &b).await;
        a.router.peer_manager().add(c_address).unwrap();
        a.router.peer_manager().report_useful(&b.id(), 5.0);
        let b_score = a.router.peer_manager().score(&b.id()).unwrap();

        let mut updates = a.router.subscribe_peer_updates();
        a.router.peer_manager().ban(&b.id()).unwrap();
        wait_for(&mut updates, is_down(b.id())).await;
        a.stop().await;
        b.stop().await;

        let restarted = net.router_with(1, config);
        let pm = restarted.peer_manager();
        assert!(pm.is_banned(&b.id()));
        assert_eq!(pm.state(&b.id()), Some(PeerState::Evicted));
        assert!(pm.score(&b.id()).unwrap() < b_score);
        assert_eq!(pm.state(&c_address.peer_id), Some(PeerState::Stored));
        assert!(pm
            .advertise(16)
            .iter()
            .any(|addr| addr.peer_id == c_address.peer_id && addr.endpoint == c_address.endpoint));
    }

    // =========================================================================
    // TELEMETRY
    // =========================================================================

    #[tokio::test]
    async fn test_metrics_exported_through_telemetry() {
        let net = TestNetwork::new();
        let metrics = p2p_telemetry::register_router_metrics("lifecycle").unwrap();
        let transport = net.memory().transport(peer_id(1));
        let router = Router::new(net.config().clone(), transport, metrics).unwrap();
        router.open_channel(vote()).unwrap();
        router.start().unwrap();

        let _peer = net.raw_peer(5, &router).await;
        let text = p2p_telemetry::encode_metrics().unwrap();
        assert!(text.contains("lifecycle_p2p_peers 1"), "{}", text);

        router.stop().await;
        let text = p2p_telemetry::encode_metrics().unwrap();
        assert!(text.contains("lifecycle_p2p_peers 0"), "{}", text);
    }
}
