//! Exponential reconnect backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::DeviceConfig;

/// Delay sequence `base, 2*base, 4*base, ...` capped at `max`, each value scaled
/// by a random factor in `[1 - jitter, 1 + jitter]` and never exceeding `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_max, config.backoff_jitter)
    }

    /// Attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the current attempt.
    pub fn nominal(&self) -> Duration {
        let factor = 1u32 << self.attempt.min(20);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal();
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return nominal;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor).min(self.max)
    }

    /// Back to `base` after a successful handshake.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
