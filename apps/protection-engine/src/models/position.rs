//! Position and local protection-record types.
//!
//! A [`Position`] is venue-reported truth and is never cached beyond a
//! single reconciliation cycle. A [`PositionRecord`] is the local, durable
//! view of a position and the protection the engine believes exists for it;
//! it is advisory only — whenever the two disagree, the venue wins.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderSide, ProtectionKind};

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Long position (profits when price rises).
    Long,
    /// Short position (profits when price falls).
    Short,
}

impl Direction {
    /// Side of the order that opens a position in this direction.
    #[must_use]
    pub const fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces a position in this direction.
    #[must_use]
    pub const fn closing_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A live position as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol.
    pub symbol: String,
    /// Position direction.
    pub direction: Direction,
    /// Absolute position size in contracts. Always positive.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Current mark price.
    pub mark_price: Decimal,
    /// Estimated liquidation price, when the venue reports one.
    pub liquidation_price: Option<Decimal>,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Unrealized gain as a signed fraction of the entry price, positive
    /// when the position is winning.
    #[must_use]
    pub fn gain_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let moved = (self.mark_price - self.entry_price) / self.entry_price;
        match self.direction {
            Direction::Long => moved,
            Direction::Short => -moved,
        }
    }
}

/// Lifecycle status of a protection order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionStatus {
    /// Submitted, not yet confirmed on the live order list.
    Pending,
    /// Confirmed resting on the venue.
    Confirmed,
    /// Cancelled by this engine.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
}

/// Local record of a protection order the engine believes exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionOrder {
    /// Stop-loss or take-profit.
    pub kind: ProtectionKind,
    /// Instrument symbol.
    pub symbol: String,
    /// Trigger price, on the instrument tick grid.
    pub trigger_price: Decimal,
    /// Protected size in contracts.
    pub size: Decimal,
    /// Reduce-only flag. Protection orders are always reduce-only.
    pub reduce_only: bool,
    /// Venue order id, absent until the venue confirms the order.
    pub order_id: Option<String>,
    /// Record status.
    pub status: ProtectionStatus,
}

impl ProtectionOrder {
    /// Whether this leg is confirmed live on the venue.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == ProtectionStatus::Confirmed && self.order_id.is_some()
    }
}

/// Trailing-stop phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrailingPhase {
    /// Below the activation threshold.
    #[default]
    Inactive,
    /// Threshold crossed, waiting for the first high-water-mark improvement.
    Armed,
    /// Actively trailing the high-water-mark.
    Trailing,
}

/// Trailing-stop sub-state of a position record.
///
/// The trailing stop-loss price only ever moves in the direction that
/// reduces open risk; it never loosens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrailingState {
    /// Current phase.
    pub phase: TrailingPhase,
    /// Best price reached since arming.
    pub high_water_mark: Option<Decimal>,
    /// Trigger price of the current trailing stop-loss, once trailing.
    pub current_sl: Option<Decimal>,
}

/// Why a position stopped existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Stop-loss leg filled.
    StopLoss,
    /// Take-profit leg filled.
    TakeProfit,
    /// Closed by the max-hold sweep.
    MaxHold,
    /// Flattened by the emergency close controller.
    Emergency,
    /// Close requested through the engine's own API.
    Manual,
    /// Closed outside this engine (external order or liquidation).
    External,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::MaxHold => write!(f, "MAX_HOLD"),
            Self::Emergency => write!(f, "EMERGENCY"),
            Self::Manual => write!(f, "MANUAL"),
            Self::External => write!(f, "EXTERNAL"),
        }
    }
}

/// Durable local record for one open symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Instrument symbol.
    pub symbol: String,
    /// Position direction.
    pub direction: Direction,
    /// Position size the engine last confirmed.
    pub size: Decimal,
    /// Entry fill price.
    pub entry_price: Decimal,
    /// When the entry fill was confirmed.
    pub opened_at: DateTime<Utc>,
    /// Stop-loss leg, when one is tracked.
    pub stop_loss: Option<ProtectionOrder>,
    /// Take-profit leg, when one is tracked.
    pub take_profit: Option<ProtectionOrder>,
    /// Trailing-stop sub-state.
    #[serde(default)]
    pub trailing: TrailingState,
    /// When the record last survived a full reconciliation cycle.
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// When protection was last verified against the live order list.
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    /// A fresh record for a just-confirmed entry fill, with no protection
    /// attached yet.
    #[must_use]
    pub fn new(symbol: &str, direction: Direction, size: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            size,
            entry_price,
            opened_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            trailing: TrailingState::default(),
            last_reconciled_at: None,
            last_verified_at: None,
        }
    }

    /// Whether a confirmed stop-loss is tracked.
    #[must_use]
    pub fn has_confirmed_sl(&self) -> bool {
        self.stop_loss.as_ref().is_some_and(ProtectionOrder::is_confirmed)
    }

    /// Whether a confirmed take-profit is tracked.
    #[must_use]
    pub fn has_confirmed_tp(&self) -> bool {
        self.take_profit.as_ref().is_some_and(ProtectionOrder::is_confirmed)
    }

    /// Whether both protection legs are confirmed.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.has_confirmed_sl() && self.has_confirmed_tp()
    }

    /// How long the position has been open.
    #[must_use]
    pub fn held_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.opened_at)
    }
}

/// Archived record of a closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedRecord {
    /// The record as it stood when the position closed.
    pub record: PositionRecord,
    /// Why the position closed.
    pub exit_reason: ExitReason,
    /// When the close was confirmed.
    pub closed_at: DateTime<Utc>,
}

/// Durable marker for a symbol whose protection could not be guaranteed.
///
/// Blocks new entries on the symbol until a reconciliation cycle re-verifies
/// safety or an operator clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DangerEntry {
    /// Instrument symbol.
    pub symbol: String,
    /// Human-readable cause.
    pub reason: String,
    /// Live position size at the time the marker was written.
    pub live_size: Decimal,
    /// When the marker was written.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(direction: Direction, entry: Decimal, mark: Decimal) -> Position {
        Position {
            symbol: "BTC-USDT-SWAP".to_string(),
            direction,
            size: dec!(1),
            entry_price: entry,
            mark_price: mark,
            liquidation_price: None,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    fn make_sl(status: ProtectionStatus, order_id: Option<&str>) -> ProtectionOrder {
        ProtectionOrder {
            kind: ProtectionKind::StopLoss,
            symbol: "BTC-USDT-SWAP".to_string(),
            trigger_price: dec!(97),
            size: dec!(1),
            reduce_only: true,
            order_id: order_id.map(str::to_string),
            status,
        }
    }

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Long.entry_side(), OrderSide::Buy);
        assert_eq!(Direction::Long.closing_side(), OrderSide::Sell);
        assert_eq!(Direction::Short.entry_side(), OrderSide::Sell);
        assert_eq!(Direction::Short.closing_side(), OrderSide::Buy);
    }

    #[test]
    fn test_gain_pct_long() {
        let pos = make_position(Direction::Long, dec!(100), dec!(102));
        assert_eq!(pos.gain_pct(), dec!(0.02));
    }

    #[test]
    fn test_gain_pct_short_winning_when_price_falls() {
        let pos = make_position(Direction::Short, dec!(100), dec!(98));
        assert_eq!(pos.gain_pct(), dec!(0.02));
    }

    #[test]
    fn test_gain_pct_zero_entry() {
        let pos = make_position(Direction::Long, Decimal::ZERO, dec!(100));
        assert_eq!(pos.gain_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_record_protection_flags() {
        let mut record = PositionRecord::new("BTC-USDT-SWAP", Direction::Long, dec!(1), dec!(100));
        assert!(!record.has_confirmed_sl());
        assert!(!record.is_protected());

        record.stop_loss = Some(make_sl(ProtectionStatus::Confirmed, Some("sl-1")));
        assert!(record.has_confirmed_sl());
        assert!(!record.is_protected());

        record.take_profit = Some(ProtectionOrder {
            kind: ProtectionKind::TakeProfit,
            trigger_price: dec!(105),
            ..make_sl(ProtectionStatus::Confirmed, Some("tp-1"))
        });
        assert!(record.is_protected());
    }

    #[test]
    fn test_pending_sl_without_id_not_confirmed() {
        let mut record = PositionRecord::new("BTC-USDT-SWAP", Direction::Long, dec!(1), dec!(100));
        record.stop_loss = Some(make_sl(ProtectionStatus::Pending, None));
        assert!(!record.has_confirmed_sl());

        record.stop_loss = Some(make_sl(ProtectionStatus::Confirmed, None));
        assert!(!record.has_confirmed_sl());
    }
}
