//! Order-related types crossing the venue boundary.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// The side that offsets this one.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order - execute at best available price.
    Market,
    /// Limit order - execute at specified price or better.
    Limit,
    /// Trigger order - becomes a market order when the trigger price trades.
    TriggerMarket,
}

/// Category an order belongs to for scoped operations.
///
/// Bulk cancellation is scoped by category: protection orders may never be
/// swept as a group, only cancelled individually immediately before
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderCategory {
    /// Plain entry or close order.
    Entry,
    /// Pending conditional entry (not yet a position).
    Trigger,
    /// Stop-loss or take-profit guarding an open position.
    Protection,
}

/// Which protection leg an order represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionKind {
    /// Stop-loss leg.
    StopLoss,
    /// Take-profit leg.
    TakeProfit,
}

impl std::fmt::Display for ProtectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop-loss"),
            Self::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// Order status reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted and resting on the venue.
    Accepted,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Canceled.
    Canceled,
    /// Rejected by the venue.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order can no longer change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Returns true if the order is still working on the venue.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Accepted | Self::PartiallyFilled)
    }
}

/// A new order to be submitted to the venue.
///
/// All prices must already sit on the instrument's tick grid and the size on
/// its lot grid; the retry layer rejects specs that do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Client-assigned id for correlation.
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Market, limit, or trigger.
    pub order_type: OrderType,
    /// Category for scoped cancel operations.
    pub category: OrderCategory,
    /// Order size in contracts.
    pub size: Decimal,
    /// Limit price, for limit orders.
    pub limit_price: Option<Decimal>,
    /// Trigger price, for trigger orders.
    pub trigger_price: Option<Decimal>,
    /// Whether the order may only reduce position size.
    pub reduce_only: bool,
}

impl OrderSpec {
    /// A market entry order.
    #[must_use]
    pub fn market_entry(symbol: &str, side: OrderSide, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            category: OrderCategory::Entry,
            size,
            limit_price: None,
            trigger_price: None,
            reduce_only: false,
        }
    }

    /// A reduce-only market order that flattens (part of) a position.
    #[must_use]
    pub fn reduce_only_close(symbol: &str, side: OrderSide, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            category: OrderCategory::Entry,
            size,
            limit_price: None,
            trigger_price: None,
            reduce_only: true,
        }
    }

    /// A reduce-only trigger order protecting an open position.
    #[must_use]
    pub fn protection(symbol: &str, side: OrderSide, trigger_price: Decimal, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::TriggerMarket,
            category: OrderCategory::Protection,
            size,
            limit_price: None,
            trigger_price: Some(trigger_price),
            reduce_only: true,
        }
    }
}

/// Acknowledgement returned by the venue for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Venue-assigned order id.
    pub order_id: String,
    /// Echoed client order id.
    pub client_order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Status at acknowledgement time.
    pub status: OrderStatus,
    /// Size filled so far.
    pub filled_size: Decimal,
    /// Average fill price, when any quantity filled.
    pub avg_fill_price: Option<Decimal>,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

/// An order currently resting on the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    /// Venue-assigned order id.
    pub order_id: String,
    /// Client order id, when known to the venue.
    pub client_order_id: Option<String>,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Market, limit, or trigger.
    pub order_type: OrderType,
    /// Category for scoped cancel operations.
    pub category: OrderCategory,
    /// Remaining size.
    pub size: Decimal,
    /// Limit price, if any.
    pub limit_price: Option<Decimal>,
    /// Trigger price, if any.
    pub trigger_price: Option<Decimal>,
    /// Whether the order may only reduce position size.
    pub reduce_only: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl OpenOrder {
    /// Whether this order is a protection leg (reduce-only trigger).
    #[must_use]
    pub fn is_protection(&self) -> bool {
        self.category == OrderCategory::Protection
            || (self.reduce_only && self.order_type == OrderType::TriggerMarket)
    }
}

/// Static per-instrument metadata needed to align orders to venue rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Instrument symbol.
    pub symbol: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Minimum size increment.
    pub lot_size: Decimal,
    /// Minimum order size.
    pub min_size: Decimal,
    /// Maximum leverage the venue allows.
    pub max_leverage: u32,
}

impl InstrumentSpec {
    /// Round a price to the nearest point on the tick grid.
    #[must_use]
    pub fn round_price(&self, price: Decimal) -> Decimal {
        let steps =
            (price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (steps * self.tick_size).normalize()
    }

    /// Whether a price already sits on the tick grid.
    #[must_use]
    pub fn price_on_grid(&self, price: Decimal) -> bool {
        (price % self.tick_size).is_zero()
    }

    /// Round a size down to the lot grid. Sizes are never rounded up: an
    /// order must not exceed what the caller asked to trade.
    #[must_use]
    pub fn round_size_down(&self, size: Decimal) -> Decimal {
        ((size / self.lot_size).floor() * self.lot_size).normalize()
    }

    /// Whether a size already sits on the lot grid.
    #[must_use]
    pub fn size_on_grid(&self, size: Decimal) -> bool {
        (size % self.lot_size).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_instrument() -> InstrumentSpec {
        InstrumentSpec {
            symbol: "BTC-USDT-SWAP".to_string(),
            tick_size: dec!(0.1),
            lot_size: dec!(0.01),
            min_size: dec!(0.01),
            max_leverage: 50,
        }
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_status_terminal_and_active() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Accepted.is_terminal());
        assert!(OrderStatus::Accepted.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(!OrderStatus::Canceled.is_active());
    }

    #[test]
    fn test_round_price_to_tick() {
        let inst = make_instrument();
        assert_eq!(inst.round_price(dec!(97.04)), dec!(97));
        assert_eq!(inst.round_price(dec!(97.05)), dec!(97.1));
        assert_eq!(inst.round_price(dec!(97.1)), dec!(97.1));
    }

    #[test]
    fn test_price_on_grid() {
        let inst = make_instrument();
        assert!(inst.price_on_grid(dec!(97.1)));
        assert!(inst.price_on_grid(dec!(97.0)));
        assert!(!inst.price_on_grid(dec!(97.15)));
    }

    #[test]
    fn test_round_size_down_never_up() {
        let inst = make_instrument();
        assert_eq!(inst.round_size_down(dec!(1.019)), dec!(1.01));
        assert_eq!(inst.round_size_down(dec!(2.53)), dec!(2.53));
        assert_eq!(inst.round_size_down(dec!(0.009)), dec!(0));
    }

    #[test]
    fn test_protection_spec_is_reduce_only_trigger() {
        let spec = OrderSpec::protection("BTC-USDT-SWAP", OrderSide::Sell, dec!(97), dec!(1));
        assert!(spec.reduce_only);
        assert_eq!(spec.order_type, OrderType::TriggerMarket);
        assert_eq!(spec.category, OrderCategory::Protection);
        assert_eq!(spec.trigger_price, Some(dec!(97)));
    }

    #[test]
    fn test_market_entry_spec_not_reduce_only() {
        let spec = OrderSpec::market_entry("BTC-USDT-SWAP", OrderSide::Buy, dec!(1));
        assert!(!spec.reduce_only);
        assert_eq!(spec.order_type, OrderType::Market);
        assert_eq!(spec.category, OrderCategory::Entry);
    }

    #[test]
    fn test_open_order_protection_detection() {
        let order = OpenOrder {
            order_id: "o-1".to_string(),
            client_order_id: None,
            symbol: "BTC-USDT-SWAP".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::TriggerMarket,
            category: OrderCategory::Protection,
            size: dec!(1),
            limit_price: None,
            trigger_price: Some(dec!(97)),
            reduce_only: true,
            created_at: Utc::now(),
        };
        assert!(order.is_protection());
    }
}
