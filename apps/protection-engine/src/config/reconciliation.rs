//! Reconciliation configuration for the startup and heartbeat sweeps.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Heartbeat interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Stop offset from the current mark used when a missing stop-loss
    /// is restored without a recorded trigger (0.02 = 2%).
    #[serde(default = "default_safe_sl_pct")]
    pub safe_sl_pct: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            safe_sl_pct: default_safe_sl_pct(),
        }
    }
}

const fn default_interval_secs() -> u64 {
    30
}

fn default_safe_sl_pct() -> Decimal {
    dec!(0.02)
}
