//! Trailing stop configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Trailing stop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Unrealized gain fraction at which trailing arms (0.02 = 2%).
    #[serde(default = "default_arm_threshold_pct")]
    pub arm_threshold_pct: Decimal,
    /// Trail distance from the high-water mark, as a fraction.
    #[serde(default = "default_trail_pct")]
    pub trail_pct: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            arm_threshold_pct: default_arm_threshold_pct(),
            trail_pct: default_trail_pct(),
        }
    }
}

fn default_arm_threshold_pct() -> Decimal {
    dec!(0.02)
}

fn default_trail_pct() -> Decimal {
    dec!(0.01)
}
