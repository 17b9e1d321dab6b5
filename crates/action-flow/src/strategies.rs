//! Retry policy and backoff schedule

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Exponential backoff between attempts: `base * factor^(retry-1)`, scaled
/// by a random factor in `[1 - jitter, 1 + jitter]` and capped at `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSchedule {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
    pub jitter: f64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2.0,
            max_ms: 10_000,
            jitter: 0.2,
        }
    }
}

impl BackoffSchedule {
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            factor: 1.0,
            max_ms: 0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1 = the wait after the first
    /// failed attempt), without jitter.
    pub fn nominal(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        Duration::from_millis(raw.min(self.max_ms as f64).max(0.0) as u64)
    }

    pub fn delay_with<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(retry).as_millis() as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + (rng.gen::<f64>() * 2.0 - 1.0) * self.jitter
        } else {
            1.0
        };
        let capped = (nominal * factor).min(self.max_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let mut rng = StdRng::from_entropy();
        self.delay_with(retry, &mut rng)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!("backoff factor must be finite and >= 1, got {}", self.factor));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("backoff jitter must be within [0, 1], got {}", self.jitter));
        }
        if self.max_ms < self.base_ms {
            return Err(format!(
                "backoff cap {}ms is below its base {}ms",
                self.max_ms, self.base_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffSchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffSchedule::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffSchedule) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, BackoffSchedule::none())
    }

    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        self.backoff.validate()
    }
}
