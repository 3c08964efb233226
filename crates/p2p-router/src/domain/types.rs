//! Core domain types: identities, addresses, channels, envelopes.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::errors::ProtocolViolation;

/// Length of a [`PeerId`] in bytes (truncated SHA-256 of the public key).
pub const PEER_ID_LEN: usize = 20;

// =============================================================================
// PEER IDENTITY
// =============================================================================

/// Identity of a remote node, derived from its public key.
///
/// Stable across reconnects; the Router trusts the value reported by the
/// Transport after the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Create a PeerId from raw bytes.
    pub const fn new(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the PeerId of a public key: first 20 bytes of SHA-256.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes.copy_from_slice(&digest[..PEER_ID_LEN]);
        Self(bytes)
    }

    /// Raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..6]))
    }
}

/// Error parsing a hex-encoded [`PeerId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePeerIdError {
    #[error("invalid hex in peer id: {0}")]
    InvalidHex(String),
    #[error("peer id must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| ParsePeerIdError::InvalidHex(e.to_string()))?;
        let bytes: [u8; PEER_ID_LEN] =
            raw.as_slice()
                .try_into()
                .map_err(|_| ParsePeerIdError::InvalidLength {
                    expected: PEER_ID_LEN,
                    actual: raw.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// ADDRESSES
// =============================================================================

/// A dialable peer: identity plus transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Expected identity of the remote node
    pub peer_id: PeerId,
    /// Transport endpoint
    pub endpoint: SocketAddr,
    /// Persistent peers are always redialled and never evicted
    #[serde(default)]
    pub persistent: bool,
}

impl PeerAddress {
    /// Create a non-persistent address.
    pub fn new(peer_id: PeerId, endpoint: SocketAddr) -> Self {
        Self {
            peer_id,
            endpoint,
            persistent: false,
        }
    }

    /// Create a persistent address.
    pub fn persistent(peer_id: PeerId, endpoint: SocketAddr) -> Self {
        Self {
            peer_id,
            endpoint,
            persistent: true,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.peer_id, self.endpoint)
    }
}

// =============================================================================
// PEER LIFECYCLE
// =============================================================================

/// Lifecycle state of a peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Known, not connected
    Stored,
    /// Outbound dial in flight
    Dialing,
    /// A live PeerConnection exists
    Connected,
    /// Teardown requested, workers not yet joined
    Disconnecting,
    /// Excluded from dialing until cool-down expires (or forever if banned)
    Evicted,
}

/// Which side initiated a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The remote dialed us
    Inbound,
    /// We dialed the remote
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// Why a peer connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transport read/write failed
    Transport(String),
    /// The remote closed the connection cleanly
    ClosedByRemote,
    /// The remote broke the wire protocol
    ProtocolViolation(ProtocolViolation),
    /// A Reactor reported the peer as misbehaving
    ReactorError(String),
    /// PeerManager chose this peer for eviction
    Evicted,
    /// Local router shut down
    Shutdown,
    /// Superseded by a connection in the other direction
    Replaced,
}

impl DisconnectReason {
    /// Whether the disconnect should move the peer to the Evicted state.
    pub fn is_punitive(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation(_) | Self::ReactorError(_) | Self::Evicted
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::ClosedByRemote => write!(f, "closed by remote"),
            Self::ProtocolViolation(v) => write!(f, "protocol violation: {}", v),
            Self::ReactorError(e) => write!(f, "reactor error: {}", e),
            Self::Evicted => write!(f, "evicted"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Replaced => write!(f, "replaced by a newer connection"),
        }
    }
}

/// Peer status change delivered to subscribers and Reactors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerStatus {
    /// Connection established and workers running
    Up(Direction),
    /// Connection torn down
    Down(DisconnectReason),
}

/// A peer status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUpdate {
    pub peer_id: PeerId,
    pub status: PeerStatus,
}

/// Misbehaviour reported by a Reactor. The Router penalises and disconnects the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerError {
    pub peer_id: PeerId,
    pub reason: String,
}

impl PeerError {
    pub fn new(peer_id: PeerId, reason: impl Into<String>) -> Self {
        Self {
            peer_id,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// CHANNELS
// =============================================================================

/// Tag identifying a logical message stream and its owning Reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u16);

impl ChannelId {
    /// Wire representation (big-endian).
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A routed unit of payload plus channel and peer addressing.
///
/// Outbound envelopes set `to` or `broadcast`; inbound envelopes carry the
/// verified source in `from`. `channel_id` is stamped by the Channel.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel_id: ChannelId,
    pub from: Option<PeerId>,
    pub to: Option<PeerId>,
    pub broadcast: bool,
    pub payload: Bytes,
    pub enqueued_at: Instant,
}

impl Envelope {
    /// Outbound envelope for a single peer.
    pub fn to_peer(peer_id: PeerId, payload: impl Into<Bytes>) -> Self {
        Self {
            channel_id: ChannelId(0),
            from: None,
            to: Some(peer_id),
            broadcast: false,
            payload: payload.into(),
            enqueued_at: Instant::now(),
        }
    }

    /// Outbound envelope for every connected peer.
    pub fn broadcast(payload: impl Into<Bytes>) -> Self {
        Self {
            channel_id: ChannelId(0),
            from: None,
            to: None,
            broadcast: true,
            payload: payload.into(),
            enqueued_at: Instant::now(),
        }
    }

    /// Inbound envelope produced by a read worker.
    pub fn inbound(channel_id: ChannelId, from: PeerId, payload: Bytes) -> Self {
        Self {
            channel_id,
            from: Some(from),
            to: None,
            broadcast: false,
            payload,
            enqueued_at: Instant::now(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Node description exchanged during the Transport handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub peer_id: PeerId,
    /// Network name; peers on other networks are rejected
    pub network: String,
    /// Channels this node has registered
    pub channels: Vec<ChannelId>,
}

impl NodeInfo {
    /// Whether two nodes can talk to each other.
    pub fn is_compatible_with(&self, other: &NodeInfo) -> bool {
        self.network == other.network
    }
}
