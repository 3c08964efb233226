//! Router and channel configuration.
//!
//! Constructed by the host, validated here before anything is spawned.

use std::time::Duration;

use crate::domain::bounded::DropPolicy;
use crate::domain::errors::ConfigurationError;
use crate::domain::frame::TAG_LEN as CHANNEL_TAG_LEN;
use crate::domain::peer_table::PeerManagerConfig;
use crate::domain::types::ChannelId;

/// Router-wide settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Network name exchanged in the handshake; mismatching peers are rejected
    pub network: String,
    /// Largest frame (tag + payload) accepted from or written to a connection
    pub max_frame_size: usize,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Upper bound of the random pause between dials once `min_outbound` is met
    pub max_dial_sleep: Duration,
    /// Buffer of the peer-update broadcast; lagging subscribers skip updates
    pub peer_update_capacity: usize,
    /// Buffer of Reactor-reported peer errors
    pub error_queue_capacity: usize,
    pub peer_manager: PeerManagerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            network: "p2p-router".to_string(),
            max_frame_size: 4 * 1024 * 1024,
            dial_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            max_dial_sleep: Duration::from_secs(3),
            peer_update_capacity: 256,
            error_queue_capacity: 256,
            peer_manager: PeerManagerConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.network.is_empty() {
            return Err(ConfigurationError::Invalid("network name is empty".into()));
        }
        if self.max_frame_size <= CHANNEL_TAG_LEN {
            return Err(ConfigurationError::Invalid(format!(
                "max_frame_size must exceed the {}-byte channel tag",
                CHANNEL_TAG_LEN
            )));
        }
        if self.dial_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(ConfigurationError::Invalid(
                "dial and handshake timeouts must be non-zero".into(),
            ));
        }
        if self.peer_update_capacity == 0 || self.error_queue_capacity == 0 {
            return Err(ConfigurationError::Invalid(
                "peer update and error queue capacities must be non-zero".into(),
            ));
        }
        self.peer_manager.validate()
    }

    /// Largest payload a frame can carry.
    pub fn max_payload_size(&self) -> usize {
        self.max_frame_size.saturating_sub(CHANNEL_TAG_LEN)
    }

    /// Short timers and small limits for tests
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing() -> Self {
        Self {
            network: "test-network".to_string(),
            max_frame_size: 2 * 1024 * 1024,
            dial_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            max_dial_sleep: Duration::from_millis(10),
            peer_update_capacity: 64,
            error_queue_capacity: 16,
            peer_manager: PeerManagerConfig::for_testing(),
        }
    }
}

/// Static description of one channel, fixed at registration.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    /// Capacity of each queue of this channel (per-peer outbound and shared inbound)
    pub capacity: usize,
    /// Weighted round-robin weight in the write worker
    pub priority: u16,
    pub drop_policy: DropPolicy,
    /// Longest a `Block` send may wait; zero never suspends
    pub send_timeout: Duration,
    pub max_message_size: usize,
    /// Label for byte metrics
    pub message_type: String,
}

impl ChannelDescriptor {
    pub fn new(id: ChannelId, message_type: impl Into<String>) -> Self {
        Self {
            id,
            capacity: 64,
            priority: 1,
            drop_policy: DropPolicy::Block,
            send_timeout: Duration::from_millis(100),
            max_message_size: 1024 * 1024,
            message_type: message_type.into(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_drop_policy(mut self, drop_policy: DropPolicy) -> Self {
        self.drop_policy = drop_policy;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Check the descriptor against the router's frame limit.
    pub fn validate(&self, max_payload_size: usize) -> Result<(), ConfigurationError> {
        if self.capacity == 0 {
            return Err(ConfigurationError::InvalidCapacity(self.id));
        }
        if self.priority == 0 {
            return Err(ConfigurationError::InvalidPriority(self.id));
        }
        if self.max_message_size > max_payload_size {
            return Err(ConfigurationError::Invalid(format!(
                "channel {} max_message_size {} exceeds frame payload limit {}",
                self.id, self.max_message_size, max_payload_size
            )));
        }
        Ok(())
    }
}
