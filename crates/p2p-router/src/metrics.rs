//! Prometheus metrics for the router.
//!
//! All metrics follow the naming convention: `<namespace>_p2p_<metric>`
//!
//! ## Metric Types
//!
//! - **Counter**: bytes per peer and channel, dropped messages, violations
//! - **Gauge**: connected peers, pending send bytes, average message size
//! - **Histogram**: queue latencies in seconds

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{
    exponential_buckets, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::domain::types::{ChannelId, PeerId};

/// Subsystem segment of every metric name.
pub const METRICS_SUBSYSTEM: &str = "p2p";

/// Router collectors.
///
/// Clones share the underlying atomics.
#[derive(Clone)]
pub struct RouterMetrics {
    /// Number of connected peers
    pub peers: IntGauge,
    /// Bytes received from a peer (`peer_id`, `ch_id`, `message_type`)
    pub peer_receive_bytes_total: IntCounterVec,
    /// Bytes sent to a peer (`peer_id`, `ch_id`, `message_type`)
    pub peer_send_bytes_total: IntCounterVec,
    /// Bytes queued but not yet written to a peer (`peer_id`)
    pub peer_pending_send_bytes: IntGaugeVec,
    /// Time an entry waited in a peer queue before the write worker took it
    pub router_peer_queue_recv: Histogram,
    /// Time a `send` spent enqueueing into a peer queue
    pub router_peer_queue_send: Histogram,
    /// Time an inbound entry waited in a channel queue before its Reactor took it
    pub router_channel_queue_send: Histogram,
    /// Messages dropped from a channel's queues (`ch_id`)
    pub router_channel_queue_dropped_msgs: IntCounterVec,
    /// Running average message size per channel (`ch_id`)
    pub peer_queue_msg_size: GaugeVec,
    /// Protocol violations by kind (`kind`)
    pub router_protocol_violations_total: IntCounterVec,
    /// Dial attempts by outcome (`outcome`: success/failed/timeout/rejected)
    pub router_dial_attempts_total: IntCounterVec,
    /// Peers torn down by a manager-issued eviction
    pub router_evictions_total: IntCounter,
}

impl std::fmt::Debug for RouterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetrics")
            .field("peers", &self.peers.get())
            .finish_non_exhaustive()
    }
}

impl RouterMetrics {
    /// Build collectors under `namespace` and register them in `registry`.
    pub fn prometheus(namespace: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::build(namespace)?;
        registry.register(Box::new(metrics.peers.clone()))?;
        registry.register(Box::new(metrics.peer_receive_bytes_total.clone()))?;
        registry.register(Box::new(metrics.peer_send_bytes_total.clone()))?;
        registry.register(Box::new(metrics.peer_pending_send_bytes.clone()))?;
        registry.register(Box::new(metrics.router_peer_queue_recv.clone()))?;
        registry.register(Box::new(metrics.router_peer_queue_send.clone()))?;
        registry.register(Box::new(metrics.router_channel_queue_send.clone()))?;
        registry.register(Box::new(metrics.router_channel_queue_dropped_msgs.clone()))?;
        registry.register(Box::new(metrics.peer_queue_msg_size.clone()))?;
        registry.register(Box::new(metrics.router_protocol_violations_total.clone()))?;
        registry.register(Box::new(metrics.router_dial_attempts_total.clone()))?;
        registry.register(Box::new(metrics.router_evictions_total.clone()))?;
        Ok(metrics)
    }

    /// Unregistered collectors. Values are still readable, which tests rely on.
    pub fn nop() -> Self {
        Self::build("nop").expect("metric creation failed")
    }

    fn build(namespace: &str) -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(METRICS_SUBSYSTEM)
        };
        let latency = |name: &str, help: &str| -> Result<Histogram, prometheus::Error> {
            Histogram::with_opts(
                HistogramOpts::new(name, help)
                    .namespace(namespace)
                    .subsystem(METRICS_SUBSYSTEM)
                    .buckets(exponential_buckets(0.000_01, 2.0, 20)?),
            )
        };
        let byte_labels = &["peer_id", "ch_id", "message_type"];

        Ok(Self {
            peers: IntGauge::with_opts(opts("peers", "Number of peers."))?,
            peer_receive_bytes_total: IntCounterVec::new(
                opts(
                    "peer_receive_bytes_total",
                    "Number of bytes received from a given peer.",
                ),
                byte_labels,
            )?,
            peer_send_bytes_total: IntCounterVec::new(
                opts("peer_send_bytes_total", "Number of bytes sent to a given peer."),
                byte_labels,
            )?,
            peer_pending_send_bytes: IntGaugeVec::new(
                opts(
                    "peer_pending_send_bytes",
                    "Pending bytes to be sent to a given peer.",
                ),
                &["peer_id"],
            )?,
            router_peer_queue_recv: latency(
                "router_peer_queue_recv",
                "Time taken to read off of a peer's queue before sending on the connection.",
            )?,
            router_peer_queue_send: latency(
                "router_peer_queue_send",
                "Time taken to send on a peer's queue which will later be read and sent on the connection.",
            )?,
            router_channel_queue_send: latency(
                "router_channel_queue_send",
                "Time taken to send on a channel's queue which will later be consumed by its reactor.",
            )?,
            router_channel_queue_dropped_msgs: IntCounterVec::new(
                opts(
                    "router_channel_queue_dropped_msgs",
                    "Number of messages dropped from a peer's queue for a specific channel.",
                ),
                &["ch_id"],
            )?,
            peer_queue_msg_size: GaugeVec::new(
                opts(
                    "peer_queue_msg_size",
                    "Average size of messages sent over a peer's queue for a specific channel.",
                ),
                &["ch_id"],
            )?,
            router_protocol_violations_total: IntCounterVec::new(
                opts(
                    "router_protocol_violations_total",
                    "Protocol violations committed by remote peers.",
                ),
                &["kind"],
            )?,
            router_dial_attempts_total: IntCounterVec::new(
                opts("router_dial_attempts_total", "Outbound dial attempts."),
                &["outcome"],
            )?,
            router_evictions_total: IntCounter::with_opts(opts(
                "router_evictions_total",
                "Peers disconnected by eviction.",
            ))?,
        })
    }

    /// Per-channel handles, resolved once at registration.
    pub fn channel(&self, channel_id: ChannelId, message_type: &str) -> ChannelMetrics {
        let ch = channel_id.to_string();
        ChannelMetrics {
            ch_id: ch.clone(),
            message_type: message_type.to_string(),
            dropped: self
                .router_channel_queue_dropped_msgs
                .with_label_values(&[&ch]),
            msg_size: self.peer_queue_msg_size.with_label_values(&[&ch]),
            sent_msgs: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
        }
    }

    /// Per-peer byte counters for one channel.
    pub fn peer_channel(&self, peer_id: &PeerId, channel: &ChannelMetrics) -> PeerChannelMetrics {
        let peer = peer_id.to_string();
        let labels = [peer.as_str(), channel.ch_id.as_str(), channel.message_type.as_str()];
        PeerChannelMetrics {
            sent_bytes: self.peer_send_bytes_total.with_label_values(&labels),
            received_bytes: self.peer_receive_bytes_total.with_label_values(&labels),
        }
    }

    pub fn pending_send_bytes(&self, peer_id: &PeerId) -> IntGauge {
        self.peer_pending_send_bytes
            .with_label_values(&[&peer_id.to_string()])
    }

    /// Drop series that only make sense while the peer is connected.
    pub fn forget_peer(&self, peer_id: &PeerId) {
        let _ = self
            .peer_pending_send_bytes
            .remove_label_values(&[&peer_id.to_string()]);
    }

    pub fn record_violation(&self, kind: &str) {
        self.router_protocol_violations_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn record_dial(&self, outcome: &str) {
        self.router_dial_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Metric handles bound to one channel.
#[derive(Debug)]
pub struct ChannelMetrics {
    ch_id: String,
    message_type: String,
    dropped: IntCounter,
    msg_size: Gauge,
    sent_msgs: AtomicU64,
    sent_bytes: AtomicU64,
}

impl ChannelMetrics {
    /// Count `n` dropped entries.
    pub fn record_drops(&self, n: u64) {
        if n > 0 {
            self.dropped.inc_by(n);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Fold one message into the running average size.
    pub fn observe_message_size(&self, size: usize) {
        let n = self.sent_msgs.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.sent_bytes.fetch_add(size as u64, Ordering::Relaxed) + size as u64;
        self.msg_size.set(total as f64 / n as f64);
    }

    pub fn average_message_size(&self) -> f64 {
        self.msg_size.get()
    }
}

/// Byte counters for one (peer, channel) pair.
#[derive(Debug, Clone)]
pub struct PeerChannelMetrics {
    pub sent_bytes: IntCounter,
    pub received_bytes: IntCounter,
}
