//! # Router
//!
//! Central coordinator. Owns the registered channels, the PeerManager and
//! every spawned task.
//!
//! ## Task Layout
//!
//! ```text
//! accept loop ──► handshake task ──► PeerManager::accepted ──► run_peer
//! dial loop ────► dial task ───────► PeerManager::dialed ────► run_peer
//! evict loop ───► PeerSlot::close(Evicted)
//! error loop ───► penalise + PeerSlot::close(ReactorError)
//! dispatcher (one per Reactor)
//! ```
//!
//! All tasks share one `TaskTracker` and a child of the router's
//! `CancellationToken`; `stop()` cancels and joins them.

// Semantic submodules
mod lifecycle;
mod tasks;

// Re-export public API
pub use lifecycle::Router;
