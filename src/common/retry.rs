//! Exponential backoff with jitter
//!
//! Used by the REST client for transient request failures and by the market
//! data feed between reconnection attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first one (0 = unbounded)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomization as a fraction of the delay (0.2 = ±20%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with fixed tiny delays, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Stateful backoff calculator for one operation
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    ///
    /// The first call corresponds to the first retry (the initial attempt
    /// needs no delay).
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.policy.max_attempts != 0 && self.attempt >= self.policy.max_attempts {
            return None;
        }

        let exponent = (self.attempt - 1).min(32) as i32;
        let base = self.policy.initial_backoff_ms as f64 * self.policy.multiplier.powi(exponent);
        let capped = base.min(self.policy.max_backoff_ms as f64);

        let jitter_range = capped * self.policy.jitter;
        let delay = if jitter_range > 0.0 {
            let mut rng = rand::thread_rng();
            rng.gen_range((capped - jitter_range).max(0.0)..=capped + jitter_range)
        } else {
            capped
        };

        Some(Duration::from_millis(
            delay.min(self.policy.max_backoff_ms as f64) as u64,
        ))
    }

    /// Attempts made so far (not counting the initial one)
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over, e.g. after a reconnect succeeded
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_are_bounded() {
        let mut backoff = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        }
        .backoff();

        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_delays_grow_and_respect_cap() {
        let policy = RetryPolicy {
            max_attempts: 0,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let mut backoff = policy.backoff();
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_backoff().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 0,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            multiplier: 1.0,
            jitter: 0.2,
        };
        let mut backoff = policy.backoff();
        for _ in 0..100 {
            let delay = backoff.next_backoff().unwrap().as_millis();
            assert!((800..=1_200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = RetryPolicy::immediate(2).backoff();
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_backoff().is_some());
    }
}
