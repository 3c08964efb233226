//! # TCP End-to-End
//!
//! Two routers over loopback TCP: handshake, delivery both ways and a clean
//! shutdown observed by the remote side.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use p2p_router::{
        Channel, ChannelDescriptor, ChannelId, DisconnectReason, Envelope, PeerStatus, Router,
        RouterConfig, RouterMetrics, TcpTransport,
    };

    use crate::harness::{is_down, is_up, peer_id, wait_for, WAIT};

    const CH: ChannelId = ChannelId(0x30);

    async fn tcp_router(seed: u8) -> (Router, Channel) {
        let config = RouterConfig::for_testing();
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = TcpTransport::bind(peer_id(seed), loopback, config.max_frame_size)
            .await
            .unwrap();
        let router = Router::new(config, Arc::new(transport), RouterMetrics::nop()).unwrap();
        let channel = router
            .open_channel(ChannelDescriptor::new(CH, "tx").with_max_message_size(256 * 1024))
            .unwrap();
        router.start().unwrap();
        (router, channel)
    }

    #[tokio::test]
    async fn test_routers_talk_over_tcp() {
        let (a, a_ch) = tcp_router(1).await;
        let (b, b_ch) = tcp_router(2).await;
        let mut a_updates = a.subscribe_peer_updates();
        let mut b_updates = b.subscribe_peer_updates();

        a.peer_manager().add(b.local_address()).unwrap();
        wait_for(&mut a_updates, is_up(b.local_peer_id())).await;
        wait_for(&mut b_updates, is_up(a.local_peer_id())).await;

        let big: Vec<u8> = (0..200 * 1024).map(|i| (i % 7) as u8).collect();
        a_ch.send(Envelope::to_peer(b.local_peer_id(), big.clone()))
            .await
            .unwrap();
        let got = b_ch.receive_timeout(WAIT).await.unwrap();
        assert_eq!(got.payload.len(), big.len());
        assert_eq!(&got.payload[..], &big[..]);
        assert_eq!(got.from, Some(a.local_peer_id()));

        b_ch.send(Envelope::broadcast(&b"hello over tcp"[..]))
            .await
            .unwrap();
        let got = a_ch.receive_timeout(WAIT).await.unwrap();
        assert_eq!(&got.payload[..], b"hello over tcp");

        b.stop().await;
        let down = wait_for(&mut a_updates, is_down(b.local_peer_id())).await;
        assert!(matches!(
            down.status,
            PeerStatus::Down(DisconnectReason::ClosedByRemote)
                | PeerStatus::Down(DisconnectReason::Transport(_))
        ));
        assert!(a.connected_peers().is_empty());
        a.stop().await;
    }
}
