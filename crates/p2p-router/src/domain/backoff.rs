//! Dial retry backoff.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for dial retries.
///
/// After the k-th consecutive failure the next attempt waits
/// `base * 2^min(k, max_exponent) - jitter` with `jitter` in `[0, max_jitter]`.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max_exponent: u32,
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_exponent: 8, // ~2 min
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl BackoffConfig {
    /// Delay after `failures` consecutive failures, less `jitter` (clamped).
    pub fn delay(&self, failures: u32, jitter: Duration) -> Duration {
        let exponent = failures.min(self.max_exponent).min(31);
        let nominal = self.base.saturating_mul(1u32 << exponent);
        nominal.saturating_sub(jitter.min(self.max_jitter))
    }

    /// Lower bound of [`Self::delay`] for any jitter.
    pub fn min_delay(&self, failures: u32) -> Duration {
        self.delay(failures, self.max_jitter)
    }

    /// Draw a jitter value in `[0, max_jitter]`.
    pub fn sample_jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=max))
    }
}
