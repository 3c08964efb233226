//! # Bounded FIFO with Drop Policies
//!
//! Pure queue logic behind every ChannelQueue. Capacity is fixed at
//! construction and never exceeded; when full, the configured
//! [`DropPolicy`] decides which entry loses.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What happens when a send hits a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropPolicy {
    /// Suspend the sender up to the channel timeout, then fail with QueueFull
    Block,
    /// Evict the head, append the new entry
    DropOldest,
    /// Discard the new entry; the send reports success
    DropNewest,
    /// Fail immediately with QueueFull
    Reject,
}

/// Result of a push attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    /// Appended without loss
    Enqueued,
    /// Appended after evicting the returned head entry
    EvictedOldest(T),
    /// The new entry was discarded (`DropNewest`)
    DroppedNewest(T),
    /// Queue full; the entry is handed back (`Block` and `Reject`)
    Full(T),
}

impl<T> PushOutcome<T> {
    /// Whether this outcome lost an entry.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::EvictedOldest(_) | Self::DroppedNewest(_))
    }
}

/// Fixed-capacity FIFO.
#[derive(Debug)]
pub struct BoundedFifo<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedFifo<T> {
    /// Create an empty queue. A zero capacity is clamped to one; channel
    /// registration rejects zero before it gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `item`, applying `policy` when the queue is full.
    pub fn push(&mut self, item: T, policy: DropPolicy) -> PushOutcome<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return PushOutcome::Enqueued;
        }

        match policy {
            DropPolicy::DropOldest => match self.items.pop_front() {
                Some(oldest) => {
                    self.items.push_back(item);
                    PushOutcome::EvictedOldest(oldest)
                }
                // unreachable with capacity >= 1
                None => {
                    self.items.push_back(item);
                    PushOutcome::Enqueued
                }
            },
            DropPolicy::DropNewest => PushOutcome::DroppedNewest(item),
            DropPolicy::Block | DropPolicy::Reject => PushOutcome::Full(item),
        }
    }

    /// Remove the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove the oldest entry matching `pred`, preserving the order of the rest.
    pub fn pop_where<F>(&mut self, pred: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let idx = self.items.iter().position(pred)?;
        self.items.remove(idx)
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
