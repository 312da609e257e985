//! Execution coordinator configuration.

use serde::{Deserialize, Serialize};

/// Execution configuration for position opens and closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Leverage applied before entry when the request does not carry one.
    #[serde(default)]
    pub default_leverage: Option<u32>,
    /// Re-entry cooldown after any exit, in seconds. Zero disables it.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Maximum holding time before a position is force-closed, in
    /// seconds. Absent means no limit.
    #[serde(default)]
    pub max_hold_secs: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_leverage: None,
            cooldown_secs: default_cooldown_secs(),
            max_hold_secs: None,
        }
    }
}

impl ExecutionConfig {
    /// Maximum holding time as a `chrono::Duration`, if configured.
    #[must_use]
    pub fn max_hold(&self) -> Option<chrono::Duration> {
        self.max_hold_secs
            .map(|secs| chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }
}

const fn default_cooldown_secs() -> u64 {
    300 // 5 minutes
}
