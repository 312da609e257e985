//! In-memory paper venue.
//!
//! A self-contained venue implementation used by the daemon's paper mode
//! and by tests. Market orders fill instantly at the mark price, trigger
//! orders rest until [`PaperVenue::set_mark`] trades through them, and all
//! fills are published on the push-event stream. Behavior intentionally
//! mirrors the venue rules the engine depends on: reduce-only orders can
//! never reverse a position, and unaligned prices are rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use async_trait::async_trait;

use crate::models::{
    Direction, FillEvent, InstrumentSpec, OpenOrder, OrderAck, OrderSide, OrderSpec, OrderStatus,
    OrderType, Position, VenueEvent,
};

use super::adapter::VenueGateway;
use super::types::VenueError;

/// An order resting on the paper book.
struct Resting {
    order: OpenOrder,
    /// For trigger orders: fire when the mark trades at or above the
    /// trigger (`true`) or at or below it (`false`).
    fires_above: Option<bool>,
}

#[derive(Default)]
struct Book {
    instruments: HashMap<String, InstrumentSpec>,
    marks: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Resting>,
    leverage: HashMap<String, u32>,
}

/// In-memory venue for paper trading and tests.
pub struct PaperVenue {
    book: Mutex<Book>,
    events: broadcast::Sender<VenueEvent>,
    order_seq: AtomicU64,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperVenue {
    /// Create an empty paper venue.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            book: Mutex::new(Book::default()),
            events,
            order_seq: AtomicU64::new(1),
        }
    }

    /// Register an instrument and its starting mark price.
    pub async fn add_instrument(&self, spec: InstrumentSpec, initial_mark: Decimal) {
        let mut book = self.book.lock().await;
        book.marks.insert(spec.symbol.clone(), initial_mark);
        book.instruments.insert(spec.symbol.clone(), spec);
    }

    /// Current mark price for a symbol.
    pub async fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.book.lock().await.marks.get(symbol).copied()
    }

    /// Move the mark price, filling any trigger or limit orders it trades
    /// through.
    pub async fn set_mark(&self, symbol: &str, mark: Decimal) {
        let mut book = self.book.lock().await;
        book.marks.insert(symbol.to_string(), mark);

        let mut fired: Vec<String> = book
            .orders
            .iter()
            .filter(|(_, resting)| resting.order.symbol == symbol)
            .filter(|(_, resting)| match (resting.order.order_type, resting.fires_above) {
                (OrderType::TriggerMarket, Some(true)) => {
                    resting.order.trigger_price.is_some_and(|t| mark >= t)
                }
                (OrderType::TriggerMarket, Some(false)) => {
                    resting.order.trigger_price.is_some_and(|t| mark <= t)
                }
                (OrderType::Limit, _) => resting.order.limit_price.is_some_and(|limit| {
                    match resting.order.side {
                        OrderSide::Buy => mark <= limit,
                        OrderSide::Sell => mark >= limit,
                    }
                }),
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        fired.sort();

        for order_id in fired {
            let Some(resting) = book.orders.remove(&order_id) else {
                continue;
            };
            let fill_price = resting
                .order
                .trigger_price
                .or(resting.order.limit_price)
                .unwrap_or(mark);
            self.apply_fill(&mut book, &resting.order, fill_price);
        }
    }

    /// Publish a `Disconnect` event to subscribers.
    pub fn emit_disconnect(&self) {
        let _ = self.events.send(VenueEvent::Disconnect);
    }

    /// Publish a `Reconnect` event to subscribers.
    pub fn emit_reconnect(&self) {
        let _ = self.events.send(VenueEvent::Reconnect);
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Apply a (possibly partial) fill of `order` to the book and publish
    /// the fill event. Reduce-only fills clamp to the live size and never
    /// reverse.
    fn apply_fill(&self, book: &mut Book, order: &OpenOrder, fill_price: Decimal) {
        let applied = if order.reduce_only {
            let Some(position) = book.positions.get_mut(&order.symbol) else {
                debug!(order_id = %order.order_id, "reduce-only order on flat book, dropped");
                return;
            };
            let applied = order.size.min(position.size);
            position.size -= applied;
            if position.size.is_zero() {
                book.positions.remove(&order.symbol);
            }
            applied
        } else {
            let direction = match order.side {
                OrderSide::Buy => Direction::Long,
                OrderSide::Sell => Direction::Short,
            };
            match book.positions.get_mut(&order.symbol) {
                Some(position) => {
                    let total = position.size + order.size;
                    position.entry_price = (position.entry_price * position.size
                        + fill_price * order.size)
                        / total;
                    position.size = total;
                }
                None => {
                    book.positions.insert(
                        order.symbol.clone(),
                        Position {
                            symbol: order.symbol.clone(),
                            direction,
                            size: order.size,
                            entry_price: fill_price,
                            mark_price: fill_price,
                            liquidation_price: None,
                            unrealized_pnl: Decimal::ZERO,
                        },
                    );
                }
            }
            order.size
        };

        if applied.is_zero() {
            return;
        }

        let _ = self.events.send(VenueEvent::Fill(FillEvent {
            symbol: order.symbol.clone(),
            order_id: order.order_id.clone(),
            category: order.category,
            side: order.side,
            fill_size: applied,
            fill_price,
            filled_at: Utc::now(),
        }));
    }

    fn refreshed(position: &Position, mark: Decimal) -> Position {
        let mut position = position.clone();
        let moved = match position.direction {
            Direction::Long => mark - position.entry_price,
            Direction::Short => position.entry_price - mark,
        };
        position.mark_price = mark;
        position.unrealized_pnl = moved * position.size;
        position
    }
}

#[async_trait]
impl VenueGateway for PaperVenue {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, VenueError> {
        let book = self.book.lock().await;
        let Some(position) = book.positions.get(symbol) else {
            return Ok(None);
        };
        let mark = book.marks.get(symbol).copied().unwrap_or(position.mark_price);
        Ok(Some(Self::refreshed(position, mark)))
    }

    async fn get_positions(&self) -> Result<Vec<Position>, VenueError> {
        let book = self.book.lock().await;
        let mut positions: Vec<Position> = book
            .positions
            .values()
            .map(|position| {
                let mark = book
                    .marks
                    .get(&position.symbol)
                    .copied()
                    .unwrap_or(position.mark_price);
                Self::refreshed(position, mark)
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, VenueError> {
        let book = self.book.lock().await;
        let mut orders: Vec<OpenOrder> = book
            .orders
            .values()
            .filter(|resting| resting.order.symbol == symbol)
            .map(|resting| resting.order.clone())
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders)
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, VenueError> {
        let mut book = self.book.lock().await;
        let instrument = book
            .instruments
            .get(&spec.symbol)
            .ok_or_else(|| VenueError::UnknownInstrument(spec.symbol.clone()))?
            .clone();

        for price in [spec.limit_price, spec.trigger_price].into_iter().flatten() {
            if !instrument.price_on_grid(price) {
                return Err(VenueError::UnroundedPrice {
                    price,
                    tick_size: instrument.tick_size,
                });
            }
        }
        if !instrument.size_on_grid(spec.size) {
            return Err(VenueError::UnroundedSize {
                size: spec.size,
                lot_size: instrument.lot_size,
            });
        }
        if spec.size < instrument.min_size {
            return Err(VenueError::rejected(
                "MIN_SIZE",
                format!("size {} below minimum {}", spec.size, instrument.min_size),
            ));
        }

        let mark = book
            .marks
            .get(&spec.symbol)
            .copied()
            .ok_or_else(|| VenueError::rejected("NO_MARK", "no mark price for instrument"))?;

        let order_id = self.next_order_id();
        let now = Utc::now();

        match spec.order_type {
            OrderType::Market => {
                if spec.reduce_only {
                    let Some(position) = book.positions.get(&spec.symbol) else {
                        return Err(VenueError::rejected(
                            "REDUCE_ONLY_FLAT",
                            "reduce-only order with no open position",
                        ));
                    };
                    if spec.side != position.direction.closing_side() {
                        return Err(VenueError::rejected(
                            "REDUCE_ONLY_SIDE",
                            "reduce-only order would increase the position",
                        ));
                    }
                } else if let Some(position) = book.positions.get(&spec.symbol) {
                    let adds = match spec.side {
                        OrderSide::Buy => position.direction == Direction::Long,
                        OrderSide::Sell => position.direction == Direction::Short,
                    };
                    if !adds {
                        return Err(VenueError::rejected(
                            "OPPOSING_POSITION",
                            "order opposes the open position; use reduce-only to close",
                        ));
                    }
                }

                let order = OpenOrder {
                    order_id: order_id.clone(),
                    client_order_id: Some(spec.client_order_id.clone()),
                    symbol: spec.symbol.clone(),
                    side: spec.side,
                    order_type: OrderType::Market,
                    category: spec.category,
                    size: spec.size,
                    limit_price: None,
                    trigger_price: None,
                    reduce_only: spec.reduce_only,
                    created_at: now,
                };
                self.apply_fill(&mut book, &order, mark);

                Ok(OrderAck {
                    order_id,
                    client_order_id: spec.client_order_id.clone(),
                    symbol: spec.symbol.clone(),
                    status: OrderStatus::Filled,
                    filled_size: spec.size,
                    avg_fill_price: Some(mark),
                    submitted_at: now,
                })
            }
            OrderType::TriggerMarket => {
                let trigger = spec.trigger_price.ok_or_else(|| {
                    VenueError::rejected("MISSING_TRIGGER", "trigger order without trigger price")
                })?;
                let resting = Resting {
                    order: OpenOrder {
                        order_id: order_id.clone(),
                        client_order_id: Some(spec.client_order_id.clone()),
                        symbol: spec.symbol.clone(),
                        side: spec.side,
                        order_type: OrderType::TriggerMarket,
                        category: spec.category,
                        size: spec.size,
                        limit_price: None,
                        trigger_price: Some(trigger),
                        reduce_only: spec.reduce_only,
                        created_at: now,
                    },
                    fires_above: Some(trigger >= mark),
                };
                book.orders.insert(order_id.clone(), resting);

                Ok(OrderAck {
                    order_id,
                    client_order_id: spec.client_order_id.clone(),
                    symbol: spec.symbol.clone(),
                    status: OrderStatus::Accepted,
                    filled_size: Decimal::ZERO,
                    avg_fill_price: None,
                    submitted_at: now,
                })
            }
            OrderType::Limit => {
                let limit = spec.limit_price.ok_or_else(|| {
                    VenueError::rejected("MISSING_LIMIT", "limit order without limit price")
                })?;
                let resting = Resting {
                    order: OpenOrder {
                        order_id: order_id.clone(),
                        client_order_id: Some(spec.client_order_id.clone()),
                        symbol: spec.symbol.clone(),
                        side: spec.side,
                        order_type: OrderType::Limit,
                        category: spec.category,
                        size: spec.size,
                        limit_price: Some(limit),
                        trigger_price: None,
                        reduce_only: spec.reduce_only,
                        created_at: now,
                    },
                    fires_above: None,
                };
                book.orders.insert(order_id.clone(), resting);

                Ok(OrderAck {
                    order_id,
                    client_order_id: spec.client_order_id.clone(),
                    symbol: spec.symbol.clone(),
                    status: OrderStatus::Accepted,
                    filled_size: Decimal::ZERO,
                    avg_fill_price: None,
                    submitted_at: now,
                })
            }
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), VenueError> {
        let mut book = self.book.lock().await;
        if book.orders.remove(order_id).is_none() {
            return Err(VenueError::OrderNotFound {
                order_id: order_id.to_string(),
            });
        }
        Ok(())
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, VenueError> {
        self.book
            .lock()
            .await
            .instruments
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::UnknownInstrument(symbol.to_string()))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError> {
        let mut book = self.book.lock().await;
        let max = book
            .instruments
            .get(symbol)
            .map(|i| i.max_leverage)
            .ok_or_else(|| VenueError::UnknownInstrument(symbol.to_string()))?;
        if leverage == 0 || leverage > max {
            return Err(VenueError::rejected(
                "LEVERAGE",
                format!("leverage {leverage} outside 1..={max}"),
            ));
        }
        book.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<VenueEvent> {
        self.events.subscribe()
    }

    fn venue_name(&self) -> &'static str {
        "paper"
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTC-USDT-SWAP";

    async fn make_venue() -> PaperVenue {
        let venue = PaperVenue::new();
        venue
            .add_instrument(
                InstrumentSpec {
                    symbol: SYMBOL.to_string(),
                    tick_size: dec!(1),
                    lot_size: dec!(0.1),
                    min_size: dec!(0.1),
                    max_leverage: 50,
                },
                dec!(100),
            )
            .await;
        venue
    }

    #[tokio::test]
    async fn test_market_entry_fills_at_mark() {
        let venue = make_venue().await;
        let ack = venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_fill_price, Some(dec!(100)));

        let position = venue.get_position(SYMBOL).await.unwrap().unwrap();
        assert_eq!(position.direction, Direction::Long);
        assert_eq!(position.size, dec!(1));
        assert_eq!(position.entry_price, dec!(100));
    }

    #[tokio::test]
    async fn test_reduce_only_on_flat_rejected() {
        let venue = make_venue().await;
        let err = venue
            .place_order(&OrderSpec::reduce_only_close(SYMBOL, OrderSide::Sell, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_reduce_only_clamps_and_never_reverses() {
        let venue = make_venue().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        venue
            .place_order(&OrderSpec::reduce_only_close(SYMBOL, OrderSide::Sell, dec!(5)))
            .await
            .unwrap();

        assert!(venue.get_position(SYMBOL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_trigger_fires_on_mark_cross() {
        let venue = make_venue().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        venue
            .place_order(&OrderSpec::protection(SYMBOL, OrderSide::Sell, dec!(97), dec!(1)))
            .await
            .unwrap();

        assert_eq!(venue.get_open_orders(SYMBOL).await.unwrap().len(), 1);

        venue.set_mark(SYMBOL, dec!(98)).await;
        assert_eq!(venue.get_open_orders(SYMBOL).await.unwrap().len(), 1);

        venue.set_mark(SYMBOL, dec!(96)).await;
        assert!(venue.get_open_orders(SYMBOL).await.unwrap().is_empty());
        assert!(venue.get_position(SYMBOL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_profit_trigger_fires_above() {
        let venue = make_venue().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        venue
            .place_order(&OrderSpec::protection(SYMBOL, OrderSide::Sell, dec!(105), dec!(1)))
            .await
            .unwrap();

        venue.set_mark(SYMBOL, dec!(105)).await;
        assert!(venue.get_position(SYMBOL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fill_events_published() {
        let venue = make_venue().await;
        let mut events = venue.subscribe();

        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        let event = events.try_recv().unwrap();
        match event {
            VenueEvent::Fill(fill) => {
                assert_eq!(fill.symbol, SYMBOL);
                assert_eq!(fill.fill_size, dec!(1));
            }
            other => panic!("expected fill event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unrounded_price_rejected_by_venue() {
        let venue = make_venue().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(1)))
            .await
            .unwrap();

        let err = venue
            .place_order(&OrderSpec::protection(SYMBOL, OrderSide::Sell, dec!(97.5), dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::UnroundedPrice { .. }));
    }

    #[tokio::test]
    async fn test_mark_to_market_pnl() {
        let venue = make_venue().await;
        venue
            .place_order(&OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(2)))
            .await
            .unwrap();

        venue.set_mark(SYMBOL, dec!(103)).await;
        let position = venue.get_position(SYMBOL).await.unwrap().unwrap();
        assert_eq!(position.mark_price, dec!(103));
        assert_eq!(position.unrealized_pnl, dec!(6));
    }

    #[tokio::test]
    async fn test_set_leverage_bounds() {
        let venue = make_venue().await;
        assert!(venue.set_leverage(SYMBOL, 10).await.is_ok());
        assert!(venue.set_leverage(SYMBOL, 0).await.is_err());
        assert!(venue.set_leverage(SYMBOL, 100).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let venue = make_venue().await;
        let err = venue.cancel_order(SYMBOL, "missing").await.unwrap_err();
        assert!(matches!(err, VenueError::OrderNotFound { .. }));
    }
}
