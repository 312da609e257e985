//! Emergency close configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Emergency close configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    /// Maximum close attempts before the symbol is marked dangerous.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay between attempts, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Exponential growth factor between attempts.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl EmergencyConfig {
    /// First backoff delay as a `Duration`.
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_config_defaults() {
        let config = EmergencyConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_backoff(), Duration::from_secs(1));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }
}
