//! Trailing Stop Integration Tests
//!
//! Drives the mark price through the paper venue and verifies the stop
//! ratchet over full heartbeats: arm on the configured gain, one
//! cancel-and-replace per improvement of the high-water mark, and no
//! churn when the mark stalls or retreats.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use protection_engine::config::Config;
use protection_engine::execution::{Engine, OpenRequest};
use protection_engine::models::{Direction, InstrumentSpec};
use protection_engine::venue::{PaperVenue, VenueGateway};
use rust_decimal_macros::dec;

const SYMBOL: &str = "BTC-USDT-SWAP";

async fn make_engine() -> (Arc<PaperVenue>, Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let venue = Arc::new(PaperVenue::new());
    venue
        .add_instrument(
            InstrumentSpec {
                symbol: SYMBOL.to_string(),
                tick_size: dec!(0.1),
                lot_size: dec!(0.1),
                min_size: dec!(0.1),
                max_leverage: 50,
            },
            dec!(100),
        )
        .await;

    let mut config = Config::default();
    config.persistence.state_dir = dir.path().to_path_buf();
    config.execution.cooldown_secs = 0;
    config.emergency.initial_backoff_ms = 5;
    config.trailing.arm_threshold_pct = dec!(0.01);
    config.trailing.trail_pct = dec!(0.005);
    let engine = Engine::new(Arc::clone(&venue) as Arc<dyn VenueGateway>, &config).unwrap();
    engine.bootstrap().await.unwrap();
    (venue, engine, dir)
}

fn stop_state(record: &protection_engine::models::PositionRecord) -> (rust_decimal::Decimal, String) {
    let stop = record.stop_loss.as_ref().unwrap();
    (stop.trigger_price, stop.order_id.clone().unwrap())
}

#[tokio::test]
async fn test_two_improvements_mean_two_replacements() {
    let (venue, engine, _dir) = make_engine().await;

    // Take-profit pushed far out of the way, the stop does the work.
    let mut request = OpenRequest::new(SYMBOL, Direction::Long, dec!(1));
    request.take_profit_pct = Some(dec!(0.5));
    let record = engine.open_protected(request).await.unwrap();
    let (initial_trigger, initial_id) = stop_state(&record);
    assert_eq!(initial_trigger, dec!(98.0));

    // Gain crosses the arm threshold, no tightening yet.
    venue.set_mark(SYMBOL, dec!(101)).await;
    engine.heartbeat().await.unwrap();
    let armed = engine.positions().await.pop().unwrap();
    let (armed_trigger, armed_id) = stop_state(&armed);
    assert_eq!(armed_trigger, initial_trigger);
    assert_eq!(armed_id, initial_id);

    // First improvement of the high-water mark.
    venue.set_mark(SYMBOL, dec!(105)).await;
    engine.heartbeat().await.unwrap();
    let first = engine.positions().await.pop().unwrap();
    let (first_trigger, first_id) = stop_state(&first);
    assert_eq!(first_trigger, dec!(104.5));
    assert_ne!(first_id, initial_id);

    // Second improvement, one more replacement.
    venue.set_mark(SYMBOL, dec!(106)).await;
    engine.heartbeat().await.unwrap();
    let second = engine.positions().await.pop().unwrap();
    let (second_trigger, second_id) = stop_state(&second);
    assert_eq!(second_trigger, dec!(105.5));
    assert_ne!(second_id, first_id);

    // Exactly one stop and one take-profit live on the venue.
    let orders = venue.get_open_orders(SYMBOL).await.unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn test_stalled_mark_holds_the_stop() {
    let (venue, engine, _dir) = make_engine().await;

    let mut request = OpenRequest::new(SYMBOL, Direction::Long, dec!(1));
    request.take_profit_pct = Some(dec!(0.5));
    engine.open_protected(request).await.unwrap();

    venue.set_mark(SYMBOL, dec!(101)).await;
    engine.heartbeat().await.unwrap();
    venue.set_mark(SYMBOL, dec!(105)).await;
    engine.heartbeat().await.unwrap();
    let tightened = engine.positions().await.pop().unwrap();
    let (trigger, order_id) = stop_state(&tightened);

    // A pullback never loosens the stop, and an unchanged high-water
    // mark never touches the venue.
    venue.set_mark(SYMBOL, dec!(104.8)).await;
    engine.heartbeat().await.unwrap();
    let held = engine.positions().await.pop().unwrap();
    let (held_trigger, held_id) = stop_state(&held);
    assert_eq!(held_trigger, trigger);
    assert_eq!(held_id, order_id);
}
