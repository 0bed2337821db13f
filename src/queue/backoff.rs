//! Retry backoff for rejected messages

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with uniform jitter.
///
/// `delay(n) = min(base_ms * multiplier^n, max_ms) + rand(0..=jitter_ms)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for retry count zero, in milliseconds
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    /// Growth factor per retry
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound before jitter, in milliseconds
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Maximum random jitter added on top, in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter, mostly useful for deterministic tests
    pub fn fixed(base_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier,
            max_ms,
            jitter_ms: 0,
        }
    }

    /// Same policy with a different multiplier and cap
    pub fn with_overrides(&self, multiplier: f64, max_ms: u64) -> Self {
        Self {
            multiplier,
            max_ms,
            ..self.clone()
        }
    }

    /// Capped delay before jitter
    pub fn base_delay_ms(&self, retry_count: u32) -> u64 {
        // 2^32 overflows any sane cap long before it matters
        let exponent = retry_count.min(32) as i32;
        let raw = self.base_ms as f64 * self.multiplier.max(1.0).powi(exponent);

        if !raw.is_finite() || raw >= self.max_ms as f64 {
            self.max_ms
        } else {
            raw as u64
        }
    }

    /// Delay to apply after the given retry count, jitter included
    pub fn delay(&self, retry_count: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis(self.base_delay_ms(retry_count).saturating_add(jitter))
    }
}

fn default_base_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_jitter_ms() -> u64 {
    1000
}
