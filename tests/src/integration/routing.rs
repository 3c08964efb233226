//! # Routing Scenarios
//!
//! Delivery between connected routers:
//!
//! 1. **Unicast**: payloads from empty to 64 KiB arrive intact, in order, on
//!    the channel they were sent on
//! 2. **Broadcast**: one send reaches every connected peer
//! 3. **Reactors**: a Reactor answers through its Channel
//! 4. **Scheduling**: a 3:1 priority split interleaves instead of starving
//!    the low-priority channel

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use p2p_router::{
        Channel, ChannelDescriptor, ChannelId, Connection, Direction, Envelope, PeerId, Reactor,
    };

    use crate::harness::{connect, TestNetwork, WAIT};

    const BLOCKS: ChannelId = ChannelId(0x40);
    const TXS: ChannelId = ChannelId(0x30);

    fn blocks() -> ChannelDescriptor {
        ChannelDescriptor::new(BLOCKS, "block_part").with_max_message_size(64 * 1024)
    }

    fn txs() -> ChannelDescriptor {
        ChannelDescriptor::new(TXS, "tx")
    }

    fn pattern(size: usize) -> Bytes {
        (0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    // =========================================================================
    // UNICAST
    // =========================================================================

    #[tokio::test]
    async fn test_payload_sizes_round_trip() {
        let net = TestNetwork::new();
        let a = net.node(1, &[blocks(), txs()]);
        let b = net.node(2, &[blocks(), txs()]);
        connect(&a, &b).await;

        for size in [0, 1, 2, 1500, 64 * 1024 - 1, 64 * 1024] {
            a.channel(BLOCKS)
                .send(Envelope::to_peer(b.id(), pattern(size)))
                .await
                .unwrap();

            let got = b.channel(BLOCKS).receive_timeout(WAIT).await.unwrap();
            assert_eq!(got.payload.len(), size);
            assert_eq!(got.payload, pattern(size));
            assert_eq!(got.from, Some(a.id()));
            assert_eq!(got.channel_id, BLOCKS);
        }

        // nothing leaked onto the other channel
        assert!(b.channel(TXS).try_receive().is_none());

        // and the link works the other way
        b.channel(TXS)
            .send(Envelope::to_peer(a.id(), &b"ack"[..]))
            .await
            .unwrap();
        let ack = a.channel(TXS).receive_timeout(WAIT).await.unwrap();
        assert_eq!(&ack.payload[..], b"ack");
        assert_eq!(ack.from, Some(b.id()));
    }

    #[tokio::test]
    async fn test_order_preserved_per_peer_and_channel() {
        let net = TestNetwork::new();
        let a = net.node(1, &[txs()]);
        let b = net.node(2, &[txs()]);
        connect(&a, &b).await;

        for i in 0u32..50 {
            a.channel(TXS)
                .send(Envelope::to_peer(b.id(), i.to_be_bytes().to_vec()))
                .await
                .unwrap();
        }
        for i in 0u32..50 {
            let got = b.channel(TXS).receive_timeout(WAIT).await.unwrap();
            assert_eq!(&got.payload[..], &i.to_be_bytes());
        }
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_before_queueing() {
        let net = TestNetwork::new();
        let a = net.node(1, &[blocks()]);
        let b = net.node(2, &[blocks()]);
        connect(&a, &b).await;

        let err = a
            .channel(BLOCKS)
            .send(Envelope::to_peer(b.id(), pattern(64 * 1024 + 1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            p2p_router::RouterError::MessageTooLarge { size, max, .. }
                if size == 64 * 1024 + 1 && max == 64 * 1024
        ));
        // the link survives a locally rejected send
        assert_eq!(a.router.connected_peers(), vec![b.id()]);
    }

    // =========================================================================
    // BROADCAST
    // =========================================================================

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let net = TestNetwork::new();
        let hub = net.node(1, &[txs()]);
        let spokes: Vec<_> = (2..=4).map(|seed| net.node(seed, &[txs()])).collect();
        for spoke in &spokes {
            connect(&hub, spoke).await;
        }
        assert_eq!(hub.router.connected_peers().len(), spokes.len());

        hub.channel(TXS)
            .send(Envelope::broadcast(&b"gossip"[..]))
            .await
            .unwrap();

        for spoke in &spokes {
            let got = spoke.channel(TXS).receive_timeout(WAIT).await.unwrap();
            assert_eq!(&got.payload[..], b"gossip");
            assert_eq!(got.from, Some(hub.id()));
        }
    }

    // =========================================================================
    // REACTORS
    // =========================================================================

    #[derive(Default)]
    struct Pong {
        peers_up: Mutex<Vec<PeerId>>,
    }

    #[async_trait]
    impl Reactor for Pong {
        async fn on_message(&self, envelope: Envelope, channel: &Channel) {
            let Some(from) = envelope.from else {
                return;
            };
            let mut reply = b"pong:".to_vec();
            reply.extend_from_slice(&envelope.payload);
            let _ = channel.send(Envelope::to_peer(from, reply)).await;
        }

        async fn on_peer_up(&self, peer: PeerId, _direction: Direction) {
            self.peers_up.lock().push(peer);
        }
    }

    #[tokio::test]
    async fn test_reactor_answers_through_its_channel() {
        let net = TestNetwork::new();
        let pong = Arc::new(Pong::default());
        let server = net.reactor_node(2, txs(), pong.clone());
        let client = net.node(1, &[txs()]);
        connect(&client, &server).await;

        client
            .channel(TXS)
            .send(Envelope::to_peer(server.id(), &b"ping"[..]))
            .await
            .unwrap();
        let reply = client.channel(TXS).receive_timeout(WAIT).await.unwrap();
        assert_eq!(&reply.payload[..], b"pong:ping");
        assert_eq!(reply.from, Some(server.id()));
        assert_eq!(pong.peers_up.lock().as_slice(), &[client.id()]);
    }

    // =========================================================================
    // SCHEDULING
    // =========================================================================

    async fn read_tag(conn: &Arc<dyn Connection>) -> u16 {
        let frame = tokio::time::timeout(WAIT, conn.read_frame())
            .await
            .expect("frame in time")
            .unwrap()
            .expect("connection open");
        u16::from_be_bytes([frame[0], frame[1]])
    }

    #[tokio::test]
    async fn test_priority_split_interleaves_channels() {
        const HI: ChannelId = ChannelId(0x10);
        const LO: ChannelId = ChannelId(0x11);
        const BULK: ChannelId = ChannelId(0x12);

        let net = TestNetwork::new();
        let node = net.node(
            1,
            &[
                ChannelDescriptor::new(HI, "vote").with_priority(3),
                ChannelDescriptor::new(LO, "tx").with_priority(1),
                ChannelDescriptor::new(BULK, "bulk").with_capacity(128),
            ],
        );
        let reader = net.raw_peer(9, &node.router).await;
        let peer = crate::harness::peer_id(9);

        // park the write worker on a full link so both queues build up
        let in_flight = p2p_router::adapters::memory::PIPE_CAPACITY + 1;
        for _ in 0..in_flight {
            node.channel(BULK)
                .send(Envelope::to_peer(peer, &b"filler"[..]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        for _ in 0..9 {
            node.channel(HI)
                .send(Envelope::to_peer(peer, &b"hi"[..]))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            node.channel(LO)
                .send(Envelope::to_peer(peer, &b"lo"[..]))
                .await
                .unwrap();
        }

        for _ in 0..in_flight {
            assert_eq!(read_tag(&reader).await, BULK.0);
        }
        let mut tags = Vec::new();
        for _ in 0..12 {
            tags.push(read_tag(&reader).await);
        }

        let head = &tags[..8];
        let hi_in_head = head.iter().filter(|t| **t == HI.0).count();
        let lo_in_head = head.iter().filter(|t| **t == LO.0).count();
        assert!(hi_in_head >= 5, "high priority under-served: {:?}", tags);
        assert!(lo_in_head >= 1, "low priority starved: {:?}", tags);
        assert_eq!(tags.iter().filter(|t| **t == HI.0).count(), 9);
        assert_eq!(tags.iter().filter(|t| **t == LO.0).count(), 3);
    }
}
