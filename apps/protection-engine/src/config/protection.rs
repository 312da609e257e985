//! Protection leg configuration: default stop and target offsets.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Protection configuration for stop-loss and take-profit legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Default stop-loss offset from entry, as a fraction (0.02 = 2%).
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Default take-profit offset from entry, as a fraction.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    /// Relative drift between leg size and position size tolerated
    /// before legs are resized (0.01 = 1%).
    #[serde(default = "default_size_tolerance_pct")]
    pub size_tolerance_pct: Decimal,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            size_tolerance_pct: default_size_tolerance_pct(),
        }
    }
}

fn default_stop_loss_pct() -> Decimal {
    dec!(0.02)
}

fn default_take_profit_pct() -> Decimal {
    dec!(0.04)
}

fn default_size_tolerance_pct() -> Decimal {
    dec!(0.01)
}
