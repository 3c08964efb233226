//! # Backpressure Scenarios
//!
//! Every queue is bounded and a full queue resolves by the channel's drop
//! policy, never by stalling someone else:
//!
//! - a peer that stops reading only fills its own outbound queue
//! - `Block` waits up to the channel timeout, `Reject` fails at once
//! - a slow consumer loses the oldest inbound entries under `DropOldest`
//! - teardown accounts for every queued message as delivered or dropped

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::Instant;

    use p2p_router::{ChannelDescriptor, ChannelId, Connection, DropPolicy, Envelope, RouterError};

    use crate::harness::{connect, eventually, is_down, peer_id, wait_for, TestNetwork, WAIT};

    const CH: ChannelId = ChannelId(0x20);

    fn descriptor(policy: DropPolicy, capacity: usize) -> ChannelDescriptor {
        ChannelDescriptor::new(CH, "vote")
            .with_drop_policy(policy)
            .with_capacity(capacity)
    }

    async fn drain(conn: &Arc<dyn Connection>) -> usize {
        let mut frames = 0;
        while let Ok(Ok(Some(_))) = tokio::time::timeout(WAIT, conn.read_frame()).await {
            frames += 1;
        }
        frames
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_delay_others() {
        let net = TestNetwork::new();
        let sender = net.node(1, &[descriptor(DropPolicy::DropNewest, 8)]);
        let healthy = net.node(2, &[descriptor(DropPolicy::DropNewest, 8)]);
        connect(&sender, &healthy).await;
        let _stalled = net.raw_peer(9, &sender.router).await;

        let ch = sender.channel(CH);
        for i in 0u32..200 {
            let payload = i.to_be_bytes().to_vec();
            ch.send(Envelope::to_peer(peer_id(9), payload.clone()))
                .await
                .unwrap();
            ch.send(Envelope::to_peer(healthy.id(), payload.clone()))
                .await
                .unwrap();

            let got = healthy
                .channel(CH)
                .receive_timeout(Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(&got.payload[..], &payload[..]);
        }

        assert!(ch.dropped_messages() > 0);
        // a slow reader is not a reason to disconnect
        let mut expected = vec![healthy.id(), peer_id(9)];
        expected.sort();
        assert_eq!(sender.router.connected_peers(), expected);
    }

    #[tokio::test]
    async fn test_block_policy_gives_up_after_send_timeout() {
        let net = TestNetwork::new();
        let sender = net.node(
            1,
            &[descriptor(DropPolicy::Block, 4).with_send_timeout(Duration::from_millis(50))],
        );
        let _stalled = net.raw_peer(9, &sender.router).await;

        let ch = sender.channel(CH);
        let mut failure = None;
        for _ in 0..200 {
            let started = Instant::now();
            if let Err(e) = ch.send(Envelope::to_peer(peer_id(9), &b"vote"[..])).await {
                failure = Some((e, started.elapsed()));
                break;
            }
        }

        let (err, waited) = failure.expect("queue never filled");
        assert!(matches!(err, RouterError::QueueFull { channel } if channel == CH));
        assert!(waited >= Duration::from_millis(45), "gave up after {:?}", waited);
        assert_eq!(ch.dropped_messages(), 1);
    }

    #[tokio::test]
    async fn test_reject_policy_fails_fast() {
        let net = TestNetwork::new();
        let sender = net.node(1, &[descriptor(DropPolicy::Reject, 4)]);
        let _stalled = net.raw_peer(9, &sender.router).await;

        let ch = sender.channel(CH);
        let mut rejected = 0;
        for _ in 0..200 {
            match ch.send(Envelope::to_peer(peer_id(9), &b"tx"[..])).await {
                Ok(()) => {}
                Err(RouterError::QueueFull { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(rejected > 0);
        assert_eq!(ch.dropped_messages(), rejected);
    }

    #[tokio::test]
    async fn test_slow_consumer_loses_oldest_inbound() {
        let net = TestNetwork::new();
        let sender = net.node(1, &[descriptor(DropPolicy::DropOldest, 2)]);
        let consumer = net.node(2, &[descriptor(DropPolicy::DropOldest, 2)]);
        connect(&sender, &consumer).await;

        let inbound = consumer.channel(CH);
        for (n, payload) in [&b"m1"[..], &b"m2"[..], &b"m3"[..]].into_iter().enumerate() {
            sender
                .channel(CH)
                .send(Envelope::to_peer(consumer.id(), payload))
                .await
                .unwrap();
            let queued = (n + 1).min(2);
            let dropped = n.saturating_sub(1) as u64;
            eventually("inbound entry", || {
                inbound.pending_inbound() == queued && inbound.dropped_messages() == dropped
            })
            .await;
        }

        assert_eq!(&inbound.try_receive().unwrap().payload[..], b"m2");
        assert_eq!(&inbound.try_receive().unwrap().payload[..], b"m3");
        assert!(inbound.try_receive().is_none());
    }

    #[tokio::test]
    async fn test_teardown_accounts_for_every_message() {
        let net = TestNetwork::new();
        let sender = net.node(1, &[descriptor(DropPolicy::DropNewest, 8)]);
        let stalled = net.raw_peer(9, &sender.router).await;
        let mut updates = sender.router.subscribe_peer_updates();

        let ch = sender.channel(CH);
        for i in 0u32..100 {
            ch.send(Envelope::to_peer(peer_id(9), i.to_be_bytes().to_vec()))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        stalled.close().await;
        wait_for(&mut updates, is_down(peer_id(9))).await;

        let delivered = drain(&stalled).await as u64;
        assert!(delivered > 0);
        assert_eq!(delivered + ch.dropped_messages(), 100);
    }

    #[tokio::test]
    async fn test_blocked_sender_released_by_teardown() {
        let net = TestNetwork::new();
        let sender = net.node(
            1,
            &[descriptor(DropPolicy::Block, 4).with_send_timeout(Duration::from_secs(30))],
        );
        let stalled = net.raw_peer(9, &sender.router).await;
        let ch = sender.channel(CH).clone();

        // fill until a send has to wait
        let mut filled = false;
        for _ in 0..200 {
            let send = ch.send(Envelope::to_peer(peer_id(9), &b"vote"[..]));
            if tokio::time::timeout(Duration::from_millis(50), send).await.is_err() {
                filled = true;
                break;
            }
        }
        assert!(filled, "queue never filled");

        let blocked = tokio::spawn({
            let ch = ch.clone();
            async move { ch.send(Envelope::to_peer(peer_id(9), &b"late"[..])).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        stalled.close().await;
        let result = tokio::time::timeout(WAIT, blocked)
            .await
            .expect("sender released")
            .unwrap();
        assert!(matches!(
            result,
            Err(RouterError::Closed) | Err(RouterError::PeerNotConnected(_))
        ));
    }
}
