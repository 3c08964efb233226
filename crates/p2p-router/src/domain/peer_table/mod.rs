//! # Peer Table
//!
//! Pure state machine behind the PeerManager: discovery, dial scheduling,
//! inbound admission with score-based eviction, scoring and bans.
//!
//! ## Lifecycle
//!
//! ```text
//! Stored ──dial──▶ Dialing ──dialed──▶ Connected ──disconnected──▶ Stored
//!    ▲                │                    │
//!    └──dial_failed───┘                    └──violation/evict──▶ Evicted
//! ```
//!
//! Evicted peers return to Stored when their cool-down expires, unless banned.

// Semantic submodules
mod config;
mod security;
mod table;
mod types;

// Re-export public API
pub use config::{PeerManagerConfig, ScoreConfig};
pub use security::PeerRecord;
pub use table::PeerTable;
pub use types::{AcceptOutcome, PeerStats, StoredPeer, ViolationOutcome};
