//! Engine environment configuration: trading mode and the paper-venue
//! instrument universe.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::InstrumentSpec;

/// Engine environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trading mode: "PAPER" or "LIVE".
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Instruments seeded into the paper venue. Ignored in LIVE mode,
    /// where the venue publishes its own instrument metadata.
    #[serde(default)]
    pub instruments: Vec<PaperInstrument>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            instruments: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Whether the engine runs against the in-process paper venue.
    #[must_use]
    pub fn is_paper(&self) -> bool {
        self.mode.eq_ignore_ascii_case("PAPER")
    }
}

/// One instrument seeded into the paper venue at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperInstrument {
    /// Instrument symbol.
    pub symbol: String,
    /// Price grid increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// Size grid increment.
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    /// Smallest accepted order size.
    #[serde(default = "default_min_size")]
    pub min_size: Decimal,
    /// Highest accepted leverage setting.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    /// Mark price at startup.
    pub initial_mark: Decimal,
}

impl PaperInstrument {
    /// Convert to the internal instrument metadata type.
    #[must_use]
    pub fn to_spec(&self) -> InstrumentSpec {
        InstrumentSpec {
            symbol: self.symbol.clone(),
            tick_size: self.tick_size,
            lot_size: self.lot_size,
            min_size: self.min_size,
            max_leverage: self.max_leverage,
        }
    }
}

fn default_mode() -> String {
    "PAPER".to_string()
}

fn default_tick_size() -> Decimal {
    dec!(0.1)
}

fn default_lot_size() -> Decimal {
    dec!(0.001)
}

fn default_min_size() -> Decimal {
    dec!(0.001)
}

const fn default_max_leverage() -> u32 {
    50
}
