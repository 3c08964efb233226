//! # Channel Queue
//!
//! Async wrapper around [`BoundedFifo`]: suspension for `Block` senders and
//! receivers, close semantics, drop accounting.
//!
//! Outbound queues (one per peer and channel) additionally wake their peer's
//! write worker and track the peer's pending bytes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::IntGauge;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::bounded::{BoundedFifo, DropPolicy, PushOutcome};
use crate::domain::errors::RouterError;
use crate::domain::types::{ChannelId, Envelope};
use crate::metrics::ChannelMetrics;

struct State {
    fifo: BoundedFifo<Envelope>,
    closed: bool,
}

/// Result of one enqueue attempt.
enum Attempt {
    Kept,
    /// Discarded under `DropNewest`
    Dropped,
    /// No room; the entry is handed back
    Full(Envelope),
}

/// Bounded envelope queue shared between producers and one or more consumers.
pub struct ChannelQueue {
    channel_id: ChannelId,
    policy: DropPolicy,
    state: Mutex<State>,
    readable: Notify,
    writable: Notify,
    metrics: Arc<ChannelMetrics>,
    /// Write worker wakeup (outbound only)
    wake: Option<Arc<Notify>>,
    /// Peer pending-bytes gauge (outbound only)
    pending_bytes: Option<IntGauge>,
}

impl std::fmt::Debug for ChannelQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("channel_id", &self.channel_id)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

impl ChannelQueue {
    pub fn new(
        channel_id: ChannelId,
        capacity: usize,
        policy: DropPolicy,
        metrics: Arc<ChannelMetrics>,
    ) -> Self {
        Self {
            channel_id,
            policy,
            state: Mutex::new(State {
                fifo: BoundedFifo::new(capacity),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            metrics,
            wake: None,
            pending_bytes: None,
        }
    }

    /// Outbound queue feeding a peer's write worker.
    pub fn outbound(
        channel_id: ChannelId,
        capacity: usize,
        policy: DropPolicy,
        metrics: Arc<ChannelMetrics>,
        wake: Arc<Notify>,
        pending_bytes: IntGauge,
    ) -> Self {
        let mut queue = Self::new(channel_id, capacity, policy, metrics);
        queue.wake = Some(wake);
        queue.pending_bytes = Some(pending_bytes);
        queue
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().fifo.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // =========================================================================
    // PRODUCERS
    // =========================================================================

    /// Enqueue applying the drop policy. `Block` waits up to `timeout` for
    /// space; a zero timeout never suspends.
    ///
    /// `DropNewest` reports success even when the entry was discarded.
    pub async fn push(&self, mut envelope: Envelope, timeout: Duration) -> Result<(), RouterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let writable = self.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            envelope = match self.try_push(envelope, self.policy)? {
                Attempt::Kept | Attempt::Dropped => return Ok(()),
                Attempt::Full(back) => back,
            };

            // only Block and Reject hand the entry back
            if self.policy == DropPolicy::Reject || Instant::now() >= deadline {
                self.metrics.record_drops(1);
                return Err(RouterError::QueueFull {
                    channel: self.channel_id,
                });
            }

            tokio::select! {
                _ = &mut writable => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // one last attempt in case space opened at the deadline
                    return match self.try_push(envelope, self.policy)? {
                        Attempt::Kept | Attempt::Dropped => Ok(()),
                        Attempt::Full(_) => {
                            self.metrics.record_drops(1);
                            Err(RouterError::QueueFull { channel: self.channel_id })
                        }
                    };
                }
            }
        }
    }

    /// Enqueue without ever suspending. `Block` and `Reject` degrade to
    /// dropping the new entry. Returns whether the entry was kept.
    pub fn push_nonblocking(&self, envelope: Envelope) -> bool {
        let policy = match self.policy {
            DropPolicy::Block | DropPolicy::Reject => DropPolicy::DropNewest,
            other => other,
        };
        matches!(self.try_push(envelope, policy), Ok(Attempt::Kept))
    }

    /// One attempt under `policy`.
    fn try_push(&self, mut envelope: Envelope, policy: DropPolicy) -> Result<Attempt, RouterError> {
        let size = envelope.size() as i64;
        envelope.enqueued_at = Instant::now();

        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                self.metrics.record_drops(1);
                return Err(RouterError::Closed);
            }
            state.fifo.push(envelope, policy)
        };

        match outcome {
            PushOutcome::Enqueued => {
                self.on_enqueued(size);
                Ok(Attempt::Kept)
            }
            PushOutcome::EvictedOldest(oldest) => {
                self.metrics.record_drops(1);
                self.adjust_pending(-(oldest.size() as i64));
                self.on_enqueued(size);
                Ok(Attempt::Kept)
            }
            PushOutcome::DroppedNewest(_) => {
                self.metrics.record_drops(1);
                Ok(Attempt::Dropped)
            }
            PushOutcome::Full(back) => Ok(Attempt::Full(back)),
        }
    }

    fn on_enqueued(&self, size: i64) {
        self.adjust_pending(size);
        self.readable.notify_waiters();
        if let Some(wake) = &self.wake {
            wake.notify_one();
        }
    }

    fn adjust_pending(&self, delta: i64) {
        if let Some(gauge) = &self.pending_bytes {
            gauge.add(delta);
        }
    }

    // =========================================================================
    // CONSUMERS
    // =========================================================================

    /// Take the oldest entry without waiting.
    pub fn try_recv(&self) -> Option<Envelope> {
        let envelope = self.state.lock().fifo.pop()?;
        self.on_dequeued(&envelope);
        Some(envelope)
    }

    /// Take the oldest entry matching `pred` without waiting.
    pub fn try_recv_where<F>(&self, pred: F) -> Option<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        let envelope = self.state.lock().fifo.pop_where(pred)?;
        self.on_dequeued(&envelope);
        Some(envelope)
    }

    /// Wait for the oldest entry. `None` once closed and drained.
    pub async fn recv(&self) -> Option<Envelope> {
        self.recv_where(|_| true).await
    }

    /// Wait for the oldest entry matching `pred`. `None` once closed and no
    /// matching entry remains.
    pub async fn recv_where<F>(&self, pred: F) -> Option<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(envelope) = state.fifo.pop_where(&pred) {
                    drop(state);
                    self.on_dequeued(&envelope);
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }

            readable.await;
        }
    }

    fn on_dequeued(&self, envelope: &Envelope) {
        self.adjust_pending(-(envelope.size() as i64));
        self.writable.notify_waiters();
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Refuse new entries and wake every waiter. Queued entries stay receivable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Close and discard everything queued, counting each entry as dropped.
    pub fn close_and_drain(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.fifo.drain()
        };
        let bytes: i64 = drained.iter().map(|e| e.size() as i64).sum();
        self.adjust_pending(-bytes);
        self.metrics.record_drops(drained.len() as u64);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        drained.len()
    }
}
