//! Reconnect pacing.
//!
//! A policy answers one question: how long to wait before the n-th
//! reconnect attempt of the current outage, or `None` to give up.

use std::time::Duration;

use pulse_core::backoff::{
    BackoffConfig, BackoffStrategy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, exponential_delay,
};

/// Delay schedule for reconnect attempts.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before zero-based `attempt`, or `None` once the budget is spent.
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Same delay before every attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedBackoff {
    /// Wait before each attempt.
    pub delay: Duration,
    /// Attempts per outage.
    pub max_attempts: u32,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// `base * 2^attempt`, capped, with optional jitter headroom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// First delay.
    pub base: Duration,
    /// Upper bound before jitter.
    pub max: Duration,
    /// Attempts per outage.
    pub max_attempts: u32,
    /// Jitter factor 0.0–1.0.
    pub jitter: f64,
}

impl BackoffPolicy for ExponentialBackoff {
    #[allow(clippy::cast_possible_truncation)]
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let ms = exponential_delay(
            attempt,
            self.base.as_millis() as u64,
            self.max.as_millis() as u64,
            self.jitter,
        );
        Some(Duration::from_millis(ms))
    }
}

/// Policy described by a settings block.
pub fn from_config(config: &BackoffConfig) -> Box<dyn BackoffPolicy> {
    match config.strategy {
        BackoffStrategy::Fixed => Box::new(FixedBackoff {
            delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }),
        BackoffStrategy::Exponential => Box::new(ExponentialBackoff {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            jitter: config.jitter_factor,
        }),
    }
}
