//! Error taxonomy for the router.
//!
//! Per-peer failures (transport, protocol) are isolated to one connection.
//! Configuration errors are fatal and surface before any connection is
//! accepted.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use super::types::{ChannelId, PeerId};

/// Transport-level failure. Terminates the affected connection only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection to {0} refused")]
    ConnectionRefused(SocketAddr),

    #[error("operation timed out")]
    Timeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    Closed,

    #[error("identity mismatch: expected {expected}, remote reported {actual}")]
    IdentityMismatch { expected: PeerId, actual: PeerId },

    #[error("incompatible network: local {local}, remote {remote}")]
    IncompatibleNetwork { local: String, remote: String },
}

/// Wire-protocol misbehaviour by a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Frame shorter than the channel tag
    MalformedFrame { len: usize },
    /// Channel tag not registered locally
    UnknownChannel(ChannelId),
    /// Payload above the channel's max message size
    MessageTooLarge { channel: ChannelId, size: usize },
    /// A Reactor judged the peer's message invalid
    Reported(String),
}

impl ProtocolViolation {
    /// Stable label for the violations counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Reported(_) => "reported",
        }
    }
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame { len } => write!(f, "malformed frame ({} bytes)", len),
            Self::UnknownChannel(ch) => write!(f, "unknown channel {}", ch),
            Self::MessageTooLarge { channel, size } => {
                write!(f, "message of {} bytes too large for channel {}", size, channel)
            }
            Self::Reported(reason) => write!(f, "reported: {}", reason),
        }
    }
}

/// Invalid setup. Fatal at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("channel {0} is already registered")]
    DuplicateChannel(ChannelId),

    #[error("channel {0} must have a non-zero capacity")]
    InvalidCapacity(ChannelId),

    #[error("channel {0} must have a non-zero priority")]
    InvalidPriority(ChannelId),

    #[error("channel {0} registered after the router started")]
    RegistrationAfterStart(ChannelId),

    #[error("router already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Admission and state-machine decisions of the PeerManager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerManagerError {
    #[error("cannot connect to self")]
    SelfConnection,

    #[error("peer {0} is banned")]
    Banned(PeerId),

    #[error("peer {0} is cooling down after eviction")]
    CoolingDown(PeerId),

    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),

    #[error("peer {0} lost the simultaneous-dial tie-break")]
    DialRace(PeerId),

    #[error("inbound capacity reached ({0})")]
    InboundCapacity(usize),

    #[error("outbound capacity reached ({0})")]
    OutboundCapacity(usize),

    #[error("too many peers from {0}")]
    IpLimit(std::net::IpAddr),

    #[error("too many peers from subnet of {0}")]
    SubnetLimit(std::net::IpAddr),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("peer {0} is not being dialed")]
    NotDialing(PeerId),

    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
}

/// Peer store persistence failure.
#[derive(Debug, Error)]
pub enum PeerStoreError {
    #[error("peer store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer store encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Public umbrella error returned by Router and Channel operations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("queue full on channel {channel}")]
    QueueFull { channel: ChannelId },

    #[error("protocol violation by {peer}: {violation}")]
    ProtocolViolation {
        peer: PeerId,
        violation: ProtocolViolation,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    PeerManager(#[from] PeerManagerError),

    #[error(transparent)]
    PeerStore(#[from] PeerStoreError),

    #[error("peer {0} is not connected")]
    PeerNotConnected(PeerId),

    #[error("message of {size} bytes exceeds channel {channel} limit of {max}")]
    MessageTooLarge {
        channel: ChannelId,
        size: usize,
        max: usize,
    },

    #[error("envelope has neither a destination peer nor the broadcast flag")]
    NoDestination,

    #[error("closed")]
    Closed,

    #[error("timed out")]
    Timeout,
}

/// Convenience result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
