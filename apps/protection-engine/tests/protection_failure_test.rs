//! Protection Failure Integration Tests
//!
//! Exercises the rollback path: when a protection leg cannot be placed
//! after the entry fills, the engine must drive the position flat with
//! reduce-only orders, and when even that fails it must stop after a
//! bounded number of attempts and leave a durable danger marker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use protection_engine::EngineError;
use protection_engine::config::Config;
use protection_engine::execution::{Engine, OpenRequest};
use protection_engine::models::{
    Direction, InstrumentSpec, OpenOrder, OrderAck, OrderCategory, OrderSpec, OrderType, Position,
    VenueEvent,
};
use protection_engine::venue::{PaperVenue, VenueError, VenueGateway};
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

const SYMBOL: &str = "BTC-USDT-SWAP";

/// Paper venue wrapper that rejects order categories on demand.
struct FaultyVenue {
    inner: PaperVenue,
    reject_protection: AtomicBool,
    reject_closes: AtomicBool,
    close_submissions: AtomicU32,
    reversal_submissions: AtomicU32,
}

impl FaultyVenue {
    async fn new() -> Self {
        let inner = PaperVenue::new();
        inner
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
        Self {
            inner,
            reject_protection: AtomicBool::new(false),
            reject_closes: AtomicBool::new(false),
            close_submissions: AtomicU32::new(0),
            reversal_submissions: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VenueGateway for FaultyVenue {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, VenueError> {
        self.inner.get_position(symbol).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>, VenueError> {
        self.inner.get_positions().await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, VenueError> {
        self.inner.get_open_orders(symbol).await
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, VenueError> {
        if spec.category == OrderCategory::Protection && self.reject_protection.load(Ordering::SeqCst)
        {
            return Err(VenueError::rejected("51000", "protection leg rejected"));
        }
        if spec.reduce_only && spec.order_type == OrderType::Market {
            self.close_submissions.fetch_add(1, Ordering::SeqCst);
            if self.reject_closes.load(Ordering::SeqCst) {
                return Err(VenueError::rejected("51004", "close rejected"));
            }
        }
        if !spec.reduce_only && spec.category == OrderCategory::Entry {
            // Count entries that would grow or reverse an existing
            // position; the rollback path must never submit these.
            if let Ok(Some(live)) = self.inner.get_position(spec.symbol.as_str()).await {
                if !live.size.is_zero() && live.direction.entry_side() != spec.side {
                    self.reversal_submissions.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        self.inner.place_order(spec).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, VenueError> {
        self.inner.instrument(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError> {
        self.inner.set_leverage(symbol, leverage).await
    }

    fn subscribe(&self) -> broadcast::Receiver<VenueEvent> {
        self.inner.subscribe()
    }

    fn venue_name(&self) -> &'static str {
        "faulty-paper"
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        self.inner.health_check().await
    }
}

async fn make_engine(venue: Arc<FaultyVenue>) -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.state_dir = dir.path().to_path_buf();
    config.execution.cooldown_secs = 0;
    config.emergency.initial_backoff_ms = 5;
    let engine = Engine::new(venue as Arc<dyn VenueGateway>, &config).unwrap();
    engine.bootstrap().await.unwrap();
    (engine, dir)
}

#[tokio::test]
async fn test_failed_protection_rolls_entry_back() {
    let venue = Arc::new(FaultyVenue::new().await);
    let (engine, _dir) = make_engine(Arc::clone(&venue)).await;

    venue.reject_protection.store(true, Ordering::SeqCst);

    let err = engine
        .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ProtectionFailed { .. }));

    // Exactly one reduce-only close flattened the entry, and nothing was
    // placed in the opposite direction.
    assert_eq!(venue.close_submissions.load(Ordering::SeqCst), 1);
    assert_eq!(venue.reversal_submissions.load(Ordering::SeqCst), 0);
    assert!(venue.get_position(SYMBOL).await.unwrap().is_none());

    assert!(engine.positions().await.is_empty());
    assert!(engine.danger_symbols().await.is_empty());
}

#[tokio::test]
async fn test_exhausted_emergency_close_leaves_danger_marker() {
    let venue = Arc::new(FaultyVenue::new().await);
    let (engine, _dir) = make_engine(Arc::clone(&venue)).await;

    venue.reject_protection.store(true, Ordering::SeqCst);
    venue.reject_closes.store(true, Ordering::SeqCst);

    let err = engine
        .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
        .await
        .unwrap_err();
    let EngineError::EmergencyCloseFailed { symbol, attempts } = err else {
        panic!("expected EmergencyCloseFailed, got {err}");
    };
    assert_eq!(symbol, SYMBOL);
    assert_eq!(attempts, 3);

    // Bounded retries: one close submission per attempt, never more.
    assert_eq!(venue.close_submissions.load(Ordering::SeqCst), 3);
    assert_eq!(venue.reversal_submissions.load(Ordering::SeqCst), 0);

    // The position is still live, the danger marker says so.
    let live = venue.get_position(SYMBOL).await.unwrap().unwrap();
    assert_eq!(live.direction, Direction::Long);
    assert_eq!(live.size, dec!(1));
    assert_eq!(engine.danger_symbols().await, vec![SYMBOL.to_string()]);

    // New entries on the symbol stay blocked until a human clears it.
    venue.reject_protection.store(false, Ordering::SeqCst);
    venue.reject_closes.store(false, Ordering::SeqCst);
    let gated = engine
        .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(gated, EngineError::ProtectionGapFatal { .. }));
}
