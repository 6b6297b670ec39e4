//! Discovery retry policy with jittered exponential back-off.

use std::time::Duration;

use rand::Rng;

/// Controls how long the client sleeps between empty discovery rounds.
#[derive(Debug, Clone)]
pub struct DiscoveryBackoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Jitter fraction, applied symmetrically (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for DiscoveryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl DiscoveryBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(16) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // ±jitter to prevent rediscovery storms across a fleet.
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((capped_ms * (1.0 + spread)).max(0.0) as u64)
    }
}
