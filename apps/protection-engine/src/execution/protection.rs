//! Protection order management.
//!
//! Places, replaces, cancels, and verifies the stop-loss and take-profit
//! legs guarding a position. Three rules hold throughout:
//!
//! - verification always reads the live order list, never a cached ack
//! - cancels target specific tracked order ids, never "cancel all"
//! - a placement only counts once the order is visible among live orders

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ProtectionConfig;
use crate::error::EngineError;
use crate::models::{
    Direction, InstrumentSpec, OpenOrder, OrderSpec, PositionRecord, ProtectionKind,
    ProtectionOrder, ProtectionStatus,
};
use crate::venue::{VenueClient, VenueError};

// ============================================
// Outcomes
// ============================================

/// A protection leg that could not be placed, and why.
#[derive(Debug)]
pub struct LegFailure {
    /// Which leg failed.
    pub kind: ProtectionKind,
    /// The underlying failure.
    pub error: EngineError,
}

/// Result of checking tracked legs against the live order list.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOutcome {
    /// The tracked stop-loss was found live.
    pub stop_loss_live: bool,
    /// The tracked take-profit was found live.
    pub take_profit_live: bool,
}

/// Live protection orders assigned to roles for one position.
#[derive(Debug, Default)]
pub struct SplitLegs {
    /// The order acting as a stop-loss, if any.
    pub stop_loss: Option<OpenOrder>,
    /// The order acting as a take-profit, if any.
    pub take_profit: Option<OpenOrder>,
    /// Protection orders beyond one per role.
    pub extras: Vec<OpenOrder>,
}

/// Assign live protection orders to stop-loss / take-profit roles using
/// their trigger side relative to a reference price. For a long, a sell
/// trigger below the reference stops loss and one above takes profit;
/// shorts mirror.
#[must_use]
pub fn split_legs(
    direction: Direction,
    reference_price: Decimal,
    orders: &[OpenOrder],
) -> SplitLegs {
    let mut split = SplitLegs::default();
    for order in orders {
        if !order.is_protection() || order.side != direction.closing_side() {
            continue;
        }
        let Some(trigger) = order.trigger_price else {
            continue;
        };
        let is_stop = match direction {
            Direction::Long => trigger <= reference_price,
            Direction::Short => trigger >= reference_price,
        };
        let slot = if is_stop {
            &mut split.stop_loss
        } else {
            &mut split.take_profit
        };
        if slot.is_none() {
            *slot = Some(order.clone());
        } else {
            split.extras.push(order.clone());
        }
    }
    split
}

// ============================================
// Manager
// ============================================

/// Manages the protection legs of tracked positions.
pub struct ProtectionManager {
    venue: Arc<VenueClient>,
    config: ProtectionConfig,
}

impl ProtectionManager {
    /// New manager over a venue client.
    #[must_use]
    pub fn new(venue: Arc<VenueClient>, config: ProtectionConfig) -> Self {
        Self { venue, config }
    }

    /// Default stop-loss distance as a fraction of entry price.
    #[must_use]
    pub const fn default_stop_loss_pct(&self) -> Decimal {
        self.config.stop_loss_pct
    }

    /// Default take-profit distance as a fraction of entry price.
    #[must_use]
    pub const fn default_take_profit_pct(&self) -> Decimal {
        self.config.take_profit_pct
    }

    /// Compute grid-aligned stop-loss and take-profit trigger prices from
    /// an entry price and fractional distances.
    #[must_use]
    pub fn protection_prices(
        instrument: &InstrumentSpec,
        direction: Direction,
        entry_price: Decimal,
        stop_loss_pct: Decimal,
        take_profit_pct: Decimal,
    ) -> (Decimal, Decimal) {
        let (stop_raw, profit_raw) = match direction {
            Direction::Long => (
                entry_price * (Decimal::ONE - stop_loss_pct),
                entry_price * (Decimal::ONE + take_profit_pct),
            ),
            Direction::Short => (
                entry_price * (Decimal::ONE + stop_loss_pct),
                entry_price * (Decimal::ONE - take_profit_pct),
            ),
        };
        (
            instrument.round_price(stop_raw),
            instrument.round_price(profit_raw),
        )
    }

    /// Place one protection leg and confirm it against the live order
    /// list before reporting success.
    pub async fn place_leg(
        &self,
        record: &PositionRecord,
        kind: ProtectionKind,
        trigger_price: Decimal,
    ) -> Result<ProtectionOrder, EngineError> {
        let side = record.direction.closing_side();
        let spec = OrderSpec::protection(&record.symbol, side, trigger_price, record.size);
        let ack = self.venue.place_order(&spec).await?;

        let live = self.venue.get_open_orders(&record.symbol).await?;
        if !live.iter().any(|o| o.order_id == ack.order_id) {
            return Err(EngineError::StateDrift {
                symbol: record.symbol.clone(),
                detail: format!("{kind} accepted as {} but not visible among live orders", ack.order_id),
            });
        }

        info!(
            symbol = %record.symbol,
            kind = %kind,
            order_id = %ack.order_id,
            trigger_price = %trigger_price,
            size = %record.size,
            "protection leg placed and verified"
        );

        Ok(ProtectionOrder {
            kind,
            symbol: record.symbol.clone(),
            trigger_price,
            size: record.size,
            reduce_only: true,
            order_id: Some(ack.order_id),
            status: ProtectionStatus::Confirmed,
        })
    }

    /// Attach both protection legs to a freshly-filled position, stop-loss
    /// first. On failure the record keeps whatever leg did confirm, and
    /// the error names the leg that did not.
    pub async fn attach(
        &self,
        record: &mut PositionRecord,
        stop_trigger: Decimal,
        profit_trigger: Decimal,
    ) -> Result<(), LegFailure> {
        match self
            .place_leg(record, ProtectionKind::StopLoss, stop_trigger)
            .await
        {
            Ok(leg) => record.stop_loss = Some(leg),
            Err(error) => {
                return Err(LegFailure {
                    kind: ProtectionKind::StopLoss,
                    error,
                });
            }
        }

        match self
            .place_leg(record, ProtectionKind::TakeProfit, profit_trigger)
            .await
        {
            Ok(leg) => record.take_profit = Some(leg),
            Err(error) => {
                return Err(LegFailure {
                    kind: ProtectionKind::TakeProfit,
                    error,
                });
            }
        }

        Ok(())
    }

    /// Cancel one tracked leg. An already-gone order is success.
    pub async fn cancel_leg(
        &self,
        symbol: &str,
        leg: &ProtectionOrder,
    ) -> Result<(), EngineError> {
        let Some(order_id) = leg.order_id.as_deref() else {
            return Ok(());
        };
        match self.venue.cancel_order(symbol, order_id).await {
            Ok(()) => Ok(()),
            Err(VenueError::OrderNotFound { .. }) => {
                debug!(symbol = symbol, order_id = order_id, "leg already gone on cancel");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Replace the stop-loss with one at a new trigger price sized to the
    /// record. The old leg is cancelled first, so a placement failure
    /// leaves the position unprotected; the record reflects that and the
    /// caller must treat the error as protection-critical.
    pub async fn replace_stop_loss(
        &self,
        record: &mut PositionRecord,
        new_trigger: Decimal,
    ) -> Result<(), EngineError> {
        if let Some(old) = record.stop_loss.take() {
            self.cancel_leg(&record.symbol, &old).await?;
        }
        match self.place_leg(record, ProtectionKind::StopLoss, new_trigger).await {
            Ok(leg) => {
                record.stop_loss = Some(leg);
                Ok(())
            }
            Err(error) => {
                warn!(
                    symbol = %record.symbol,
                    error = %error,
                    "stop-loss replacement failed after cancel, position unprotected"
                );
                Err(error)
            }
        }
    }

    /// Replace the take-profit with one at a new trigger price sized to
    /// the record.
    pub async fn replace_take_profit(
        &self,
        record: &mut PositionRecord,
        new_trigger: Decimal,
    ) -> Result<(), EngineError> {
        if let Some(old) = record.take_profit.take() {
            self.cancel_leg(&record.symbol, &old).await?;
        }
        let leg = self
            .place_leg(record, ProtectionKind::TakeProfit, new_trigger)
            .await?;
        record.take_profit = Some(leg);
        Ok(())
    }

    /// Check the tracked legs against the live order list.
    pub async fn verify(&self, record: &PositionRecord) -> Result<VerifyOutcome, EngineError> {
        let live = self.venue.get_open_orders(&record.symbol).await?;
        let found = |leg: &Option<ProtectionOrder>| {
            leg.as_ref()
                .and_then(|l| l.order_id.as_deref())
                .is_some_and(|id| live.iter().any(|o| o.order_id == id))
        };
        Ok(VerifyOutcome {
            stop_loss_live: found(&record.stop_loss),
            take_profit_live: found(&record.take_profit),
        })
    }

    /// Whether a live leg's size matches the position size within the
    /// configured tolerance.
    #[must_use]
    pub fn sizes_match(&self, leg_size: Decimal, position_size: Decimal) -> bool {
        if position_size.is_zero() {
            return leg_size.is_zero();
        }
        let drift = (leg_size - position_size).abs() / position_size;
        drift <= self.config.size_tolerance_pct
    }

    /// Cancel every live protection order on a symbol. Only valid once
    /// the position is confirmed flat; dangling reduce-only legs are all
    /// this can remove.
    pub async fn sweep_protection(&self, symbol: &str) -> Result<usize, EngineError> {
        let live = self.venue.get_open_orders(symbol).await?;
        let mut cancelled = 0;
        for order in live.iter().filter(|o| o.is_protection()) {
            match self.venue.cancel_order(symbol, &order.order_id).await {
                Ok(()) | Err(VenueError::OrderNotFound { .. }) => cancelled += 1,
                Err(error) => return Err(error.into()),
            }
        }
        if cancelled > 0 {
            info!(symbol = symbol, cancelled = cancelled, "swept dangling protection orders");
        }
        Ok(cancelled)
    }

    /// Cancel resting non-protection orders on a symbol, such as unfilled
    /// entry triggers during shutdown. Protection legs are left alone.
    pub async fn sweep_entries(&self, symbol: &str) -> Result<usize, EngineError> {
        let live = self.venue.get_open_orders(symbol).await?;
        let mut cancelled = 0;
        for order in live.iter().filter(|o| !o.is_protection()) {
            match self.venue.cancel_order(symbol, &order.order_id).await {
                Ok(()) | Err(VenueError::OrderNotFound { .. }) => cancelled += 1,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtectionConfig;
    use crate::models::{OrderSide, OrderSpec};
    use crate::venue::{PaperVenue, RetryPolicy, VenueClient, VenueGateway};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTC-USDT-SWAP";

    fn make_instrument() -> InstrumentSpec {
        InstrumentSpec {
            symbol: SYMBOL.to_string(),
            tick_size: dec!(0.1),
            lot_size: dec!(0.1),
            min_size: dec!(0.1),
            max_leverage: 50,
        }
    }

    async fn make_rig() -> (Arc<PaperVenue>, ProtectionManager) {
        let venue = Arc::new(PaperVenue::new());
        venue.add_instrument(make_instrument(), dec!(100)).await;
        let client = Arc::new(VenueClient::new(
            Arc::clone(&venue) as Arc<dyn crate::venue::VenueGateway>,
            RetryPolicy::default(),
        ));
        let manager = ProtectionManager::new(client, ProtectionConfig::default());
        (venue, manager)
    }

    fn make_record() -> PositionRecord {
        PositionRecord::new(SYMBOL, Direction::Long, dec!(1), dec!(100))
    }

    #[test]
    fn test_protection_prices_long() {
        let instrument = make_instrument();
        let (sl, tp) = ProtectionManager::protection_prices(
            &instrument,
            Direction::Long,
            dec!(100),
            dec!(0.02),
            dec!(0.04),
        );
        assert_eq!(sl, dec!(98.0));
        assert_eq!(tp, dec!(104.0));
    }

    #[test]
    fn test_protection_prices_short_mirror() {
        let instrument = make_instrument();
        let (sl, tp) = ProtectionManager::protection_prices(
            &instrument,
            Direction::Short,
            dec!(100),
            dec!(0.02),
            dec!(0.04),
        );
        assert_eq!(sl, dec!(102.0));
        assert_eq!(tp, dec!(96.0));
    }

    #[test]
    fn test_protection_prices_land_on_grid() {
        let instrument = InstrumentSpec {
            tick_size: dec!(0.5),
            ..make_instrument()
        };
        let (sl, tp) = ProtectionManager::protection_prices(
            &instrument,
            Direction::Long,
            dec!(101.3),
            dec!(0.02),
            dec!(0.04),
        );
        assert!(instrument.price_on_grid(sl));
        assert!(instrument.price_on_grid(tp));
    }

    #[test]
    fn test_split_legs_long() {
        let mk = |id: &str, trigger: Decimal| OpenOrder {
            order_id: id.to_string(),
            client_order_id: None,
            symbol: SYMBOL.to_string(),
            side: OrderSide::Sell,
            order_type: crate::models::OrderType::TriggerMarket,
            category: crate::models::OrderCategory::Protection,
            size: dec!(1),
            limit_price: None,
            trigger_price: Some(trigger),
            reduce_only: true,
            created_at: Utc::now(),
        };
        let orders = vec![mk("sl", dec!(95)), mk("tp", dec!(110)), mk("dup", dec!(94))];

        let split = split_legs(Direction::Long, dec!(100), &orders);
        assert_eq!(split.stop_loss.as_ref().map(|o| o.order_id.as_str()), Some("sl"));
        assert_eq!(split.take_profit.as_ref().map(|o| o.order_id.as_str()), Some("tp"));
        assert_eq!(split.extras.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_places_and_confirms_both_legs() {
        let (venue, manager) = make_rig().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        let mut record = make_record();
        manager.attach(&mut record, dec!(98), dec!(104)).await.unwrap();

        assert!(record.is_protected());
        assert_eq!(venue.get_open_orders(SYMBOL).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_leg_tolerates_missing_order() {
        let (_venue, manager) = make_rig().await;
        let leg = ProtectionOrder {
            kind: ProtectionKind::StopLoss,
            symbol: SYMBOL.to_string(),
            trigger_price: dec!(98),
            size: dec!(1),
            reduce_only: true,
            order_id: Some("long-gone".to_string()),
            status: ProtectionStatus::Confirmed,
        };
        manager.cancel_leg(SYMBOL, &leg).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_reads_live_orders() {
        let (venue, manager) = make_rig().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        let mut record = make_record();
        manager.attach(&mut record, dec!(98), dec!(104)).await.unwrap();

        let outcome = manager.verify(&record).await.unwrap();
        assert!(outcome.stop_loss_live);
        assert!(outcome.take_profit_live);

        // Fire the stop by moving the mark through it.
        venue.set_mark(SYMBOL, dec!(97)).await;
        let outcome = manager.verify(&record).await.unwrap();
        assert!(!outcome.stop_loss_live);
    }

    #[tokio::test]
    async fn test_replace_stop_loss_swaps_order() {
        let (venue, manager) = make_rig().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        let mut record = make_record();
        manager.attach(&mut record, dec!(98), dec!(104)).await.unwrap();
        let old_id = record.stop_loss.as_ref().unwrap().order_id.clone().unwrap();

        manager.replace_stop_loss(&mut record, dec!(99)).await.unwrap();
        let new_id = record.stop_loss.as_ref().unwrap().order_id.clone().unwrap();

        assert_ne!(old_id, new_id);
        let live = venue.get_open_orders(SYMBOL).await.unwrap();
        assert!(live.iter().all(|o| o.order_id != old_id));
        assert!(live.iter().any(|o| o.order_id == new_id && o.trigger_price == Some(dec!(99))));
    }

    #[tokio::test]
    async fn test_sweep_protection_only_touches_protection() {
        let (venue, manager) = make_rig().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        venue
            .place_order(&OrderSpec::protection(SYMBOL, OrderSide::Sell, dec!(98), dec!(1)))
            .await
            .unwrap();
        let mut entry = OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(0.5));
        entry.order_type = crate::models::OrderType::Limit;
        entry.limit_price = Some(dec!(90));
        venue.place_order(&entry).await.unwrap();

        let swept = manager.sweep_protection(SYMBOL).await.unwrap();
        assert_eq!(swept, 1);

        let live = venue.get_open_orders(SYMBOL).await.unwrap();
        assert_eq!(live.len(), 1);
        assert!(!live[0].is_protection());
    }

    #[test]
    fn test_size_tolerance() {
        let venue = Arc::new(PaperVenue::new());
        let client = Arc::new(VenueClient::new(
            venue as Arc<dyn crate::venue::VenueGateway>,
            RetryPolicy::default(),
        ));
        let manager = ProtectionManager::new(client, ProtectionConfig::default());

        assert!(manager.sizes_match(dec!(1), dec!(1)));
        assert!(manager.sizes_match(dec!(1.005), dec!(1)));
        assert!(!manager.sizes_match(dec!(1.5), dec!(1)));
        assert!(!manager.sizes_match(dec!(0.5), dec!(1)));
        assert!(manager.sizes_match(dec!(0), dec!(0)));
    }
}
