//! Retry and backoff policy for eventually-consistent reads
//!
//! The delay before attempt `n + 1` is `base_delay_ms * factor^(n - 1)`,
//! clamped to `max_delay_ms`. The first attempt is never delayed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of read attempts per target, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay_ms: u64,
    /// Multiplicative factor applied per attempt
    pub factor: f64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempt` (1-indexed) before trying again.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = (self.base_delay_ms as f64) * self.factor.powi(exponent);
        let max = self.max_delay_ms as f64;
        let clamped = if raw.is_nan() || raw < 0.0 {
            0.0
        } else if raw > max {
            max
        } else {
            raw
        };
        Duration::from_millis(clamped as u64)
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.factor >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "retry.factor",
                reason: format!("must be >= 1.0, got {}", self.factor),
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.base_delay_ms",
                reason: "must not exceed retry.max_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}
