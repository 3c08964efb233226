//! # Weighted Round-Robin
//!
//! Channel selection order for a peer's write worker. A round consists of
//! `max(weight)` passes; in pass `i` every channel whose weight exceeds `i`
//! gets one turn. Low-weight channels therefore wait at most one round.

/// Precomputed WRR round over a fixed set of weights.
#[derive(Debug, Clone)]
pub struct WeightedRoundRobin {
    /// Slot indices in the order they are served within one round
    round: Vec<usize>,
}

impl WeightedRoundRobin {
    /// Build the round for `weights` (index = slot). Zero weights never get a turn.
    pub fn new(weights: &[u16]) -> Self {
        let passes = weights.iter().copied().max().unwrap_or(0);
        let mut round = Vec::with_capacity(weights.iter().map(|w| *w as usize).sum());
        for pass in 0..passes {
            for (slot, weight) in weights.iter().enumerate() {
                if *weight > pass {
                    round.push(slot);
                }
            }
        }
        Self { round }
    }

    /// Slot indices of one full round.
    pub fn round(&self) -> &[usize] {
        &self.round
    }

    /// Number of turns in a round.
    pub fn len(&self) -> usize {
        self.round.len()
    }

    pub fn is_empty(&self) -> bool {
        self.round.is_empty()
    }
}
