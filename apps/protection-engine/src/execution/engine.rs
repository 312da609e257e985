//! Engine facade.
//!
//! Wires the venue client, record store, and the managers into one
//! object the daemon drives: bootstrap once, then feed it push events
//! and heartbeats.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::models::{ExitReason, PositionRecord, VenueEvent};
use crate::venue::{VenueClient, VenueGateway};

use super::coordinator::{ExecutionCoordinator, OpenRequest};
use super::emergency::EmergencyCloseController;
use super::locks::SymbolLocks;
use super::protection::ProtectionManager;
use super::reconciliation::{ReconcileReport, ReconciliationEngine};
use super::records::RecordStore;
use super::trailing::TrailingStopManager;

/// The assembled protection engine.
pub struct Engine {
    venue: Arc<VenueClient>,
    records: Arc<RecordStore>,
    protection: Arc<ProtectionManager>,
    coordinator: Arc<ExecutionCoordinator>,
    trailing: Arc<TrailingStopManager>,
    reconciliation: Arc<ReconciliationEngine>,
}

impl Engine {
    /// Assemble the engine over a venue gateway.
    pub fn new(gateway: Arc<dyn VenueGateway>, config: &Config) -> Result<Self, EngineError> {
        let venue = Arc::new(VenueClient::new(gateway, config.retry.to_policy()));
        let records = Arc::new(RecordStore::open(&config.persistence.state_dir)?);
        let locks = Arc::new(SymbolLocks::new());
        let protection = Arc::new(ProtectionManager::new(
            Arc::clone(&venue),
            config.protection.clone(),
        ));
        let emergency = Arc::new(EmergencyCloseController::new(
            Arc::clone(&venue),
            Arc::clone(&protection),
            Arc::clone(&records),
            config.emergency.clone(),
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            Arc::clone(&venue),
            Arc::clone(&protection),
            Arc::clone(&emergency),
            Arc::clone(&records),
            Arc::clone(&locks),
            config.execution.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&venue),
            Arc::clone(&protection),
            Arc::clone(&emergency),
            Arc::clone(&coordinator),
            Arc::clone(&records),
            Arc::clone(&locks),
            config.reconciliation.clone(),
        ));
        let trailing = Arc::new(TrailingStopManager::new(
            Arc::clone(&venue),
            Arc::clone(&protection),
            Arc::clone(&coordinator),
            Arc::clone(&records),
            locks,
            config.trailing.clone(),
        ));

        Ok(Self {
            venue,
            records,
            protection,
            coordinator,
            trailing,
            reconciliation,
        })
    }

    /// Startup sequence: reconcile persisted records against live venue
    /// state before anything else runs. Positions left over from the
    /// previous run come out of this adopted, re-protected, or closed.
    pub async fn bootstrap(&self) -> Result<ReconcileReport, EngineError> {
        info!(venue = self.venue.venue_name(), "bootstrapping against live venue state");
        let report = self.reconciliation.reconcile_all().await?;
        let danger = self.records.danger_symbols().await;
        if !danger.is_empty() {
            warn!(symbols = ?danger, "danger markers remain after bootstrap");
        }
        Ok(report)
    }

    /// Open a position with both protection legs attached.
    pub async fn open_protected(&self, request: OpenRequest) -> Result<PositionRecord, EngineError> {
        self.coordinator.open_protected(request).await
    }

    /// Close a tracked position on request.
    pub async fn close_position(&self, symbol: &str) -> Result<(), EngineError> {
        self.coordinator.close_position(symbol, ExitReason::Manual).await
    }

    /// Snapshot of every tracked position record.
    pub async fn positions(&self) -> Vec<PositionRecord> {
        self.records.all().await
    }

    /// Symbols currently carrying a danger marker.
    pub async fn danger_symbols(&self) -> Vec<String> {
        self.records.danger_symbols().await
    }

    /// One heartbeat: reconcile, advance trailing stops, and enforce the
    /// max-hold limit.
    pub async fn heartbeat(&self) -> Result<ReconcileReport, EngineError> {
        let report = self.reconciliation.reconcile_all().await?;
        let trailed = self.trailing.sweep().await;
        for (symbol, outcome) in &trailed {
            info!(symbol = %symbol, outcome = ?outcome, "trailing sweep");
        }
        let closed = self.coordinator.sweep_max_hold().await;
        for symbol in &closed {
            info!(symbol = %symbol, "closed by max-hold sweep");
        }
        Ok(report)
    }

    /// Feed one push event from the venue stream.
    pub async fn on_event(&self, event: VenueEvent) -> Result<(), EngineError> {
        match event {
            VenueEvent::Fill(fill) => self.coordinator.handle_fill(&fill).await,
            VenueEvent::Disconnect => {
                warn!("venue event stream disconnected, new entries gated");
                self.records.set_disconnected(true);
                Ok(())
            }
            VenueEvent::Reconnect => {
                info!("venue event stream restored, reconciling missed activity");
                self.records.set_disconnected(false);
                self.reconciliation.reconcile_all().await?;
                Ok(())
            }
        }
    }

    /// Subscribe to the venue's push-event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VenueEvent> {
        self.venue.subscribe()
    }

    /// Shutdown: cancel resting entry orders so nothing fills unattended,
    /// leaving every protection leg in place on the venue.
    pub async fn shutdown_cleanup(&self) -> Result<(), EngineError> {
        for symbol in self.records.symbols().await {
            match self.protection.sweep_entries(&symbol).await {
                Ok(0) => {}
                Ok(cancelled) => {
                    info!(symbol = %symbol, cancelled = cancelled, "cancelled resting entries at shutdown");
                }
                Err(error) => {
                    warn!(symbol = %symbol, error = %error, "entry sweep failed at shutdown");
                }
            }
        }
        info!("shutdown cleanup complete, protection legs remain live");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, InstrumentSpec, OrderSide, OrderSpec, OrderType};
    use crate::venue::PaperVenue;
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
        let engine = Engine::new(Arc::clone(&venue) as Arc<dyn VenueGateway>, &config).unwrap();
        (venue, engine, dir)
    }

    #[tokio::test]
    async fn test_bootstrap_on_empty_state_is_clean() {
        let (_venue, engine, _dir) = make_engine().await;
        let report = engine.bootstrap().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_open_heartbeat_close_round_trip() {
        let (venue, engine, _dir) = make_engine().await;
        engine.bootstrap().await.unwrap();

        let record = engine
            .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
            .await
            .unwrap();
        assert!(record.is_protected());

        let report = engine.heartbeat().await.unwrap();
        assert!(report.is_clean());

        engine.close_position(SYMBOL).await.unwrap();
        assert!(engine.positions().await.is_empty());
        assert!(venue.get_position(SYMBOL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_event_gates_entries() {
        let (_venue, engine, _dir) = make_engine().await;

        engine.on_event(VenueEvent::Disconnect).await.unwrap();
        let err = engine
            .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Disconnected));

        engine.on_event(VenueEvent::Reconnect).await.unwrap();
        engine
            .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_keeps_protection_cancels_entries() {
        let (venue, engine, _dir) = make_engine().await;
        engine
            .open_protected(OpenRequest::new(SYMBOL, Direction::Long, dec!(1)))
            .await
            .unwrap();

        // A resting limit entry that must not fill while the daemon is
        // down.
        let mut resting = OrderSpec::market_entry(SYMBOL, OrderSide::Buy, dec!(0.5));
        resting.order_type = OrderType::Limit;
        resting.limit_price = Some(dec!(90));
        venue.place_order(&resting).await.unwrap();
        assert_eq!(venue.get_open_orders(SYMBOL).await.unwrap().len(), 3);

        engine.shutdown_cleanup().await.unwrap();

        let remaining = venue.get_open_orders(SYMBOL).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(crate::models::OpenOrder::is_protection));
    }
}
