//! Push events delivered by the venue gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderCategory, OrderSide};

/// A fill reported over the venue's push stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// Venue order id that filled.
    pub order_id: String,
    /// Category of the filled order.
    pub category: OrderCategory,
    /// Side of the filled order.
    pub side: OrderSide,
    /// Filled size.
    pub fill_size: Decimal,
    /// Fill price.
    pub fill_price: Decimal,
    /// Fill timestamp.
    pub filled_at: DateTime<Utc>,
}

/// Asynchronous event from the venue gateway.
///
/// Events are funneled through the per-symbol serialization before the
/// engine acts on them, so an event and a heartbeat never race on the same
/// record.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    /// An order filled (fully or partially).
    Fill(FillEvent),
    /// The venue connection dropped. New entries are blocked until the
    /// matching `Reconnect`.
    Disconnect,
    /// The venue connection recovered. Triggers a full reconciliation.
    Reconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fill_event_round_trips_through_json() {
        let fill = FillEvent {
            symbol: "ETH-USDT-SWAP".to_string(),
            order_id: "o-7".to_string(),
            category: OrderCategory::Protection,
            side: OrderSide::Sell,
            fill_size: dec!(2),
            fill_price: dec!(1900.5),
            filled_at: Utc::now(),
        };

        let json = serde_json::to_string(&fill).unwrap();
        let back: FillEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.order_id, "o-7");
        assert_eq!(back.fill_price, dec!(1900.5));
        assert_eq!(back.category, OrderCategory::Protection);
    }
}
