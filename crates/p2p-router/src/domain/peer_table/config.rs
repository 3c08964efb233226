//! Peer management configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::backoff::BackoffConfig;
use crate::domain::errors::ConfigurationError;
use crate::domain::types::PeerAddress;

/// Score bounds and per-violation penalties.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Score of a newly discovered peer
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    /// At or below this score the peer is banned permanently
    pub ban_threshold: f64,

    pub malformed_frame_penalty: f64,
    pub unknown_channel_penalty: f64,
    pub oversized_message_penalty: f64,
    /// Applied when a Reactor reports the peer
    pub reported_penalty: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            initial: 0.0,
            min: -100.0,
            max: 100.0,
            ban_threshold: -50.0,
            malformed_frame_penalty: 20.0,
            unknown_channel_penalty: 10.0,
            oversized_message_penalty: 20.0,
            reported_penalty: 25.0,
        }
    }
}

impl ScoreConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.min < self.max) {
            return Err(ConfigurationError::Invalid(format!(
                "score range [{}, {}] is empty",
                self.min, self.max
            )));
        }
        if self.initial < self.min || self.initial > self.max {
            return Err(ConfigurationError::Invalid(
                "initial score outside [min, max]".into(),
            ));
        }
        if self.ban_threshold < self.min || self.ban_threshold >= self.initial {
            return Err(ConfigurationError::Invalid(
                "ban threshold must lie in [min, initial)".into(),
            ));
        }
        let penalties = [
            self.malformed_frame_penalty,
            self.unknown_channel_penalty,
            self.oversized_message_penalty,
            self.reported_penalty,
        ];
        if penalties.iter().any(|p| *p < 0.0 || !p.is_finite()) {
            return Err(ConfigurationError::Invalid(
                "penalties must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// PeerManager limits and policy.
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub max_inbound: usize,
    /// Dialing slots count against this limit
    pub max_outbound: usize,
    /// Below this many outbound connections the dial loop does not throttle
    pub min_outbound: usize,
    pub max_concurrent_dials: usize,
    pub max_peers_per_ip: usize,
    pub max_peers_per_subnet: usize,
    /// Always redialled, never evicted
    pub persistent_peers: Vec<PeerAddress>,
    /// How long an evicted peer stays excluded
    pub eviction_cooldown: Duration,
    pub backoff: BackoffConfig,
    pub scoring: ScoreConfig,
    /// Upper bound on known (not necessarily connected) peers
    pub max_stored_peers: usize,
    /// JSON peer store, loaded at construction and written by `save`
    pub peer_store_path: Option<PathBuf>,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            max_inbound: 40,
            max_outbound: 10,
            min_outbound: 4,
            max_concurrent_dials: 4,
            max_peers_per_ip: 2,
            max_peers_per_subnet: 8,
            persistent_peers: Vec::new(),
            eviction_cooldown: Duration::from_secs(600),
            backoff: BackoffConfig::default(),
            scoring: ScoreConfig::default(),
            max_stored_peers: 1024,
            peer_store_path: None,
        }
    }
}

impl PeerManagerConfig {
    /// Check limits for consistency.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_outbound == 0 && self.max_inbound == 0 {
            return Err(ConfigurationError::Invalid(
                "max_inbound and max_outbound are both zero".into(),
            ));
        }
        if self.min_outbound > self.max_outbound {
            return Err(ConfigurationError::Invalid(format!(
                "min_outbound ({}) exceeds max_outbound ({})",
                self.min_outbound, self.max_outbound
            )));
        }
        if self.max_concurrent_dials == 0 {
            return Err(ConfigurationError::Invalid(
                "max_concurrent_dials must be non-zero".into(),
            ));
        }
        if self.max_peers_per_ip == 0 || self.max_peers_per_subnet < self.max_peers_per_ip {
            return Err(ConfigurationError::Invalid(
                "per-subnet limit must be at least the per-ip limit, both non-zero".into(),
            ));
        }
        if self.max_stored_peers < self.persistent_peers.len() {
            return Err(ConfigurationError::Invalid(
                "max_stored_peers is smaller than the persistent peer list".into(),
            ));
        }
        if self.backoff.base.is_zero() {
            return Err(ConfigurationError::Invalid(
                "backoff base must be non-zero".into(),
            ));
        }
        self.scoring.validate()
    }

    /// Small limits and short timers for tests
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing() -> Self {
        Self {
            max_inbound: 4,
            max_outbound: 4,
            min_outbound: 1,
            max_concurrent_dials: 2,
            max_peers_per_ip: 4,
            max_peers_per_subnet: 8,
            persistent_peers: Vec::new(),
            eviction_cooldown: Duration::from_secs(30),
            backoff: BackoffConfig {
                base: Duration::from_millis(100),
                max_exponent: 4,
                max_jitter: Duration::from_millis(20),
            },
            scoring: ScoreConfig::default(),
            max_stored_peers: 64,
            peer_store_path: None,
        }
    }
}
