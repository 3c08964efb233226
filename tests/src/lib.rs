//! # P2P Router Test Suite
//!
//! Unified test crate for multi-node scenarios that exercise the router
//! through its public API only.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── harness.rs        # In-memory nodes, raw peers, update waiting
//! │   └── integration/
//! │       ├── routing.rs        # Delivery, broadcast, Reactors, channel scheduling
//! │       ├── backpressure.rs   # Drop policies, stalled peers, teardown accounting
//! │       ├── peer_lifecycle.rs # Dial races, backoff, bans, persistence
//! │       └── tcp.rs            # End-to-end over loopback TCP
//! └── benches/
//!     └── router_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p p2p-tests
//!
//! # By scenario
//! cargo test -p p2p-tests integration::backpressure::
//!
//! # Benchmarks
//! cargo bench -p p2p-tests
//! ```

pub mod harness;
