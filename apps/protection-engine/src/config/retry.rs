//! Venue call retry and backoff configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::venue::RetryPolicy;

/// Retry configuration for venue gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts for rate-limited calls.
    #[serde(default = "default_rate_limit_attempts")]
    pub max_rate_limit_attempts: u32,
    /// Maximum attempts for transient transport failures.
    #[serde(default = "default_transient_attempts")]
    pub max_transient_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor between attempts.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter fraction applied to each delay (0.1 = ±10%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_attempts: default_rate_limit_attempts(),
            max_transient_attempts: default_transient_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetryConfig {
    /// Convert to the internal `RetryPolicy` used by the venue client.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_rate_limit_attempts: self.max_rate_limit_attempts,
            max_transient_attempts: self.max_transient_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

const fn default_rate_limit_attempts() -> u32 {
    5
}

const fn default_transient_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000 // 30 seconds
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_jitter_factor() -> f64 {
    0.1
}

const fn default_call_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_rate_limit_attempts, 5);
        assert_eq!(config.max_transient_attempts, 3);
        assert_eq!(config.initial_backoff_ms, 500);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.call_timeout_secs, 10);
    }

    #[test]
    fn test_retry_config_to_policy() {
        let policy = RetryConfig::default().to_policy();
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.call_timeout, Duration::from_secs(10));
        assert_eq!(policy.max_rate_limit_attempts, 5);
    }
}
