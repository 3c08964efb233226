//! Domain Layer - Pure routing logic with no I/O
//!
//! This module contains:
//! - Peer identities, addresses, envelopes and lifecycle types
//! - Bounded FIFO with explicit drop policies
//! - Channel-tagged wire frames
//! - Weighted round-robin channel scheduling
//! - Peer table state machine (admission, eviction, scoring, bans)
//! - Dial backoff and subnet grouping

pub mod backoff;
pub mod bounded;
pub mod errors;
pub mod frame;
pub mod peer_table;
pub mod scheduler;
pub mod subnet;
pub mod types;

pub use backoff::BackoffConfig;
pub use bounded::{BoundedFifo, DropPolicy, PushOutcome};
pub use errors::*;
pub use frame::{decode_frame, encode_frame};
pub use peer_table::*;
pub use scheduler::WeightedRoundRobin;
pub use subnet::SubnetKey;
pub use types::*;
