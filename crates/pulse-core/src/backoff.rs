//! Reconnect backoff parameters and delay calculation.
//!
//! Portable, sync-only math. The async reconnect loop that sleeps on these
//! delays lives in `pulse-client`:
//!
//! - [`BackoffConfig`]: attempt budget, base and cap delays, jitter
//! - [`exponential_delay`]: capped exponential backoff with jitter headroom
//! - [`exponential_delay_with_random`]: same, with caller-supplied randomness

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of reconnect attempts after a session drops.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 3000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.0;

/// Reconnect backoff configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// `"fixed"` or `"exponential"`.
    pub strategy: BackoffStrategy,
    /// Attempts per outage before giving up (0 disables reconnecting).
    pub max_attempts: u32,
    /// Base delay in ms (the whole delay for `fixed`).
    pub base_delay_ms: u64,
    /// Cap for exponential growth in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

/// Shape of the delay curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// `base * 2^attempt`, capped.
    Exponential,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Delay before zero-based `attempt`, or `None` once the budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let ms = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Exponential => exponential_delay(
                attempt,
                self.base_delay_ms,
                self.max_delay_ms,
                self.jitter_factor,
            ),
        };
        Some(Duration::from_millis(ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff with the jitter range added on top.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + jitter)`.
/// Deterministic: callers wanting spread use
/// [`exponential_delay_with_random`].
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn exponential_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> u64 {
    let capped = capped_exponential(attempt, base_delay_ms, max_delay_ms);
    let with_jitter = (capped as f64) * (1.0 + jitter_factor.clamp(0.0, 1.0));
    with_jitter.round() as u64
}

/// Exponential backoff with explicit randomness.
///
/// `random` in `[0.0, 1.0)` maps to `[-jitter, +jitter]` around the capped
/// value.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn exponential_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = capped_exponential(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

fn capped_exponential(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_is_one_fixed_retry_after_three_seconds() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_for(0), Some(Duration::from_secs(3)));
        assert_eq!(cfg.delay_for(1), None);
    }

    #[test]
    fn zero_attempts_never_retries() {
        let cfg = BackoffConfig {
            max_attempts: 0,
            ..BackoffConfig::default()
        };
        assert_eq!(cfg.delay_for(0), None);
    }

    #[test]
    fn exponential_doubles_until_cap() {
        assert_eq!(exponential_delay(0, 100, 1000, 0.0), 100);
        assert_eq!(exponential_delay(1, 100, 1000, 0.0), 200);
        assert_eq!(exponential_delay(3, 100, 1000, 0.0), 800);
        assert_eq!(exponential_delay(4, 100, 1000, 0.0), 1000);
        assert_eq!(exponential_delay(40, 100, 1000, 0.0), 1000);
    }

    #[test]
    fn exponential_strategy_uses_curve() {
        let cfg = BackoffConfig {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 1500,
            jitter_factor: 0.0,
        };
        assert_eq!(cfg.delay_for(0), Some(Duration::from_millis(250)));
        assert_eq!(cfg.delay_for(2), Some(Duration::from_millis(1000)));
        assert_eq!(cfg.delay_for(3), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.delay_for(5), None);
    }

    #[test]
    fn jitter_adds_headroom() {
        assert_eq!(exponential_delay(0, 1000, 10_000, 0.2), 1200);
    }

    #[test]
    fn random_jitter_spans_both_sides() {
        assert_eq!(exponential_delay_with_random(0, 1000, 10_000, 0.5, 0.0), 500);
        assert_eq!(exponential_delay_with_random(0, 1000, 10_000, 0.5, 0.5), 1000);
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_value(BackoffConfig::default()).unwrap();
        assert_eq!(json["strategy"], "fixed");
        assert_eq!(json["maxAttempts"], 1);
        assert_eq!(json["baseDelayMs"], 3000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: BackoffConfig =
            serde_json::from_str(r#"{"strategy":"exponential","maxAttempts":4}"#).unwrap();
        assert_eq!(cfg.strategy, BackoffStrategy::Exponential);
        assert_eq!(cfg.max_attempts, 4);
        assert_eq!(cfg.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    proptest! {
        #[test]
        fn exponential_never_exceeds_cap(attempt in 0u32..100, base in 1u64..10_000, cap in 1u64..100_000) {
            prop_assert!(exponential_delay(attempt, base, cap, 0.0) <= cap);
        }

        #[test]
        fn random_jitter_stays_in_band(random in 0.0f64..1.0) {
            let d = exponential_delay_with_random(2, 100, 10_000, 0.25, random);
            prop_assert!((300..=500).contains(&d));
        }
    }
}
