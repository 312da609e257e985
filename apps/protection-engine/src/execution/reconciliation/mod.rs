//! Record-versus-venue reconciliation.
//!
//! Runs at startup and on every heartbeat. For each symbol the engine
//! takes a consistent snapshot of the live position and live orders under
//! the symbol lock, repairs what it can on the venue side, and defers all
//! local bookkeeping to a commit phase that runs only after every symbol
//! has been inspected. Danger markers are written the moment danger is
//! discovered but cleared only by a completed cycle that verified the
//! symbol safe.
//!
//! The invariant this module serves: an open position without a working
//! stop-loss never survives a cycle unhandled. It gets one conservative
//! re-protection attempt at a safe distance from the live mark; failing
//! that, the position is closed.

mod report;

pub use report::{DriftEvent, DriftKind, DriftSeverity, ReconcileReport};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;
use crate::error::EngineError;
use crate::models::{
    Direction, ExitReason, InstrumentSpec, OpenOrder, Position, PositionRecord, ProtectionKind,
    ProtectionOrder, ProtectionStatus,
};
use crate::venue::{VenueClient, VenueError};

use super::coordinator::ExecutionCoordinator;
use super::emergency::EmergencyCloseController;
use super::locks::SymbolLocks;
use super::protection::{ProtectionManager, split_legs};
use super::records::RecordStore;

/// Deferred local bookkeeping for one symbol, applied at commit.
#[derive(Default)]
struct SymbolPlan {
    /// Replace the tracked record (only while one is still tracked).
    upsert: Option<PositionRecord>,
    /// Insert a record adopted from live state.
    adopt: Option<PositionRecord>,
    /// Retire the tracked record with this exit reason.
    archive: Option<ExitReason>,
    /// The symbol was verified safe; clear its danger marker.
    clear_danger: bool,
}

/// Detects and repairs drift between local records and venue state.
pub struct ReconciliationEngine {
    venue: Arc<VenueClient>,
    protection: Arc<ProtectionManager>,
    emergency: Arc<EmergencyCloseController>,
    coordinator: Arc<ExecutionCoordinator>,
    records: Arc<RecordStore>,
    locks: Arc<SymbolLocks>,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    /// New engine.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Arc<VenueClient>,
        protection: Arc<ProtectionManager>,
        emergency: Arc<EmergencyCloseController>,
        coordinator: Arc<ExecutionCoordinator>,
        records: Arc<RecordStore>,
        locks: Arc<SymbolLocks>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            venue,
            protection,
            emergency,
            coordinator,
            records,
            locks,
            config,
        }
    }

    /// Run one full cycle over every symbol the engine knows about:
    /// tracked records, live positions, and danger-marked symbols.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, EngineError> {
        let started = std::time::Instant::now();
        let mut report = ReconcileReport {
            symbols_checked: 0,
            drifts: Vec::new(),
            repairs: 0,
            emergencies: Vec::new(),
            adopted: Vec::new(),
            archived: Vec::new(),
            danger_cleared: Vec::new(),
            completed_at: Utc::now(),
            duration_ms: 0,
        };

        let mut universe: BTreeSet<String> = self.records.symbols().await.into_iter().collect();
        for position in self.venue.get_positions().await? {
            if !position.size.is_zero() {
                universe.insert(position.symbol);
            }
        }
        universe.extend(self.records.danger_symbols().await);

        let mut plans = Vec::new();
        for symbol in &universe {
            match self.inspect_symbol(symbol, &mut report).await {
                Ok(plan) => plans.push((symbol.clone(), plan)),
                Err(error) => {
                    warn!(
                        symbol = %symbol,
                        error = %error,
                        "symbol inspection failed, retrying next cycle"
                    );
                }
            }
        }
        report.symbols_checked = universe.len();

        self.commit(plans, &mut report).await;

        report.completed_at = Utc::now();
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if report.has_critical() {
            warn!(report = %report, "reconciliation found unprotected positions");
        } else if report.is_clean() {
            debug!(report = %report, "reconciliation clean");
        } else {
            info!(report = %report, "reconciliation repaired drift");
        }
        Ok(report)
    }

    // ============================================
    // Inspection
    // ============================================

    /// Inspect one symbol under its lock: take a consistent snapshot of
    /// position and orders, repair on the venue side, and return the
    /// local bookkeeping to apply at commit.
    async fn inspect_symbol(
        &self,
        symbol: &str,
        report: &mut ReconcileReport,
    ) -> Result<SymbolPlan, EngineError> {
        let _guard = self.locks.acquire(symbol).await;

        let record = self.records.get(symbol).await;
        let position = self.venue.get_position(symbol).await?;
        let orders = self.venue.get_open_orders(symbol).await?;
        let live = position.filter(|p| !p.size.is_zero());

        let mut plan = SymbolPlan::default();
        match (record, live) {
            (None, None) => {
                self.tidy_flat(symbol, &orders, report, &mut plan).await?;
            }
            (Some(record), None) => {
                self.resolve_stale(record, &orders, report, &mut plan).await?;
            }
            (None, Some(position)) => {
                self.resolve_untracked(&position, &orders, report, &mut plan)
                    .await?;
            }
            (Some(record), Some(position)) => {
                self.resolve_tracked(record, &position, &orders, report, &mut plan)
                    .await?;
            }
        }
        Ok(plan)
    }

    /// Nothing tracked and nothing live. Cancel dangling protection and
    /// release any danger marker.
    async fn tidy_flat(
        &self,
        symbol: &str,
        orders: &[OpenOrder],
        report: &mut ReconcileReport,
        plan: &mut SymbolPlan,
    ) -> Result<(), EngineError> {
        for order in orders.iter().filter(|o| o.is_protection()) {
            report.drifts.push(DriftEvent::new(
                symbol,
                DriftKind::DanglingProtection,
                format!("protection order {} on a flat symbol", order.order_id),
            ));
            self.cancel_quietly(symbol, &order.order_id).await?;
            report.repairs += 1;
        }
        if self.records.is_danger(symbol).await {
            plan.clear_danger = true;
        }
        Ok(())
    }

    /// The record's position is gone from the venue. Work out how it
    /// exited from which protection leg disappeared, cancel what is left,
    /// and archive.
    async fn resolve_stale(
        &self,
        record: PositionRecord,
        orders: &[OpenOrder],
        report: &mut ReconcileReport,
        plan: &mut SymbolPlan,
    ) -> Result<(), EngineError> {
        let symbol = record.symbol.clone();
        let sl_live = Self::leg_is_live(&record.stop_loss, orders);
        let tp_live = Self::leg_is_live(&record.take_profit, orders);

        let reason = match (sl_live, tp_live) {
            (false, true) => ExitReason::StopLoss,
            (true, false) => ExitReason::TakeProfit,
            _ => ExitReason::External,
        };
        report.drifts.push(DriftEvent::new(
            &symbol,
            DriftKind::PositionGoneLocalStale,
            format!("position gone, classified as {reason} exit"),
        ));

        for order in orders.iter().filter(|o| o.is_protection()) {
            self.cancel_quietly(&symbol, &order.order_id).await?;
            report.repairs += 1;
        }

        plan.archive = Some(reason);
        if self.records.is_danger(&symbol).await {
            plan.clear_danger = true;
        }
        Ok(())
    }

    /// A live position nothing tracks. Adopt it when it already carries a
    /// stop-loss; otherwise protect it at the safe default distance, and
    /// close it if even that fails.
    async fn resolve_untracked(
        &self,
        position: &Position,
        orders: &[OpenOrder],
        report: &mut ReconcileReport,
        plan: &mut SymbolPlan,
    ) -> Result<(), EngineError> {
        let symbol = position.symbol.clone();
        report.drifts.push(DriftEvent::new(
            &symbol,
            DriftKind::UntrackedPosition,
            format!("live {} position of size {}", position.direction, position.size),
        ));

        let split = split_legs(position.direction, position.mark_price, orders);
        for extra in &split.extras {
            report.drifts.push(DriftEvent::new(
                &symbol,
                DriftKind::DanglingProtection,
                format!("duplicate protection order {}", extra.order_id),
            ));
            self.cancel_quietly(&symbol, &extra.order_id).await?;
            report.repairs += 1;
        }

        let mut record =
            PositionRecord::new(&symbol, position.direction, position.size, position.entry_price);
        record.take_profit = split
            .take_profit
            .as_ref()
            .map(|o| Self::leg_from_order(ProtectionKind::TakeProfit, o));

        if let Some(ref sl_order) = split.stop_loss {
            record.stop_loss = Some(Self::leg_from_order(ProtectionKind::StopLoss, sl_order));
            record.last_reconciled_at = Some(Utc::now());
            info!(
                symbol = %symbol,
                size = %position.size,
                stop = %sl_order.trigger_price.unwrap_or_default(),
                "adopting untracked position with live stop-loss"
            );
            if self.records.is_danger(&symbol).await {
                plan.clear_danger = true;
            }
            plan.adopt = Some(record);
            return Ok(());
        }

        report.drifts.push(DriftEvent::new(
            &symbol,
            DriftKind::MissingStopLoss,
            "untracked position has no stop-loss",
        ));
        let instrument = self.venue.instrument(&symbol).await?;
        let trigger = self.safe_trigger(&instrument, position.direction, position.mark_price);
        match self.protection.place_leg(&record, ProtectionKind::StopLoss, trigger).await {
            Ok(leg) => {
                record.stop_loss = Some(leg);
                record.last_reconciled_at = Some(Utc::now());
                report.repairs += 1;
                info!(
                    symbol = %symbol,
                    trigger = %trigger,
                    "untracked position re-protected at safe default distance"
                );
                if self.records.is_danger(&symbol).await {
                    plan.clear_danger = true;
                }
                plan.adopt = Some(record);
            }
            Err(error) => {
                warn!(
                    symbol = %symbol,
                    error = %error,
                    "safe re-protection failed, closing untracked position"
                );
                self.emergency
                    .close(&symbol, "untracked position could not be protected")
                    .await?;
                report.emergencies.push(symbol.clone());
                if self.records.is_danger(&symbol).await {
                    plan.clear_danger = true;
                }
            }
        }
        Ok(())
    }

    /// Record and position both exist. Verify every tracked leg against
    /// the live order list and repair drift.
    async fn resolve_tracked(
        &self,
        mut record: PositionRecord,
        position: &Position,
        orders: &[OpenOrder],
        report: &mut ReconcileReport,
        plan: &mut SymbolPlan,
    ) -> Result<(), EngineError> {
        let symbol = record.symbol.clone();

        if record.direction != position.direction {
            report.drifts.push(DriftEvent::new(
                &symbol,
                DriftKind::PositionGoneLocalStale,
                format!(
                    "recorded {} position replaced by a live {} one",
                    record.direction, position.direction
                ),
            ));
            for leg in [&record.stop_loss, &record.take_profit].into_iter().flatten() {
                self.protection.cancel_leg(&symbol, leg).await?;
                report.repairs += 1;
            }
            // The live position is untracked now; the next cycle adopts
            // and protects it.
            plan.archive = Some(ExitReason::External);
            return Ok(());
        }

        record.size = position.size;
        record.entry_price = position.entry_price;

        // Ids tracked at snapshot time; a replaced leg's old id is
        // already handled and must not be re-reported as a stray.
        let snapshot_ids: Vec<String> = [&record.stop_loss, &record.take_profit]
            .into_iter()
            .flatten()
            .filter_map(|l| l.order_id.clone())
            .collect();

        let sl_order = Self::find_leg(&record.stop_loss, orders);
        let tp_order = Self::find_leg(&record.take_profit, orders);

        match sl_order {
            None => {
                report.drifts.push(DriftEvent::new(
                    &symbol,
                    DriftKind::MissingStopLoss,
                    "tracked stop-loss not among live orders",
                ));
                record.stop_loss = None;
                let instrument = self.venue.instrument(&symbol).await?;
                let trigger =
                    self.safe_trigger(&instrument, record.direction, position.mark_price);
                match self.protection.place_leg(&record, ProtectionKind::StopLoss, trigger).await {
                    Ok(leg) => {
                        record.stop_loss = Some(leg);
                        report.repairs += 1;
                        info!(symbol = %symbol, trigger = %trigger, "stop-loss restored at safe default distance");
                    }
                    Err(error) => {
                        warn!(
                            symbol = %symbol,
                            error = %error,
                            "could not restore stop-loss, closing position"
                        );
                        self.emergency
                            .close(&symbol, "stop-loss could not be restored")
                            .await?;
                        report.emergencies.push(symbol.clone());
                        plan.archive = Some(ExitReason::Emergency);
                        if self.records.is_danger(&symbol).await {
                            plan.clear_danger = true;
                        }
                        return Ok(());
                    }
                }
            }
            Some(live_sl) => {
                if self.protection.sizes_match(live_sl.size, position.size) {
                    if let Some(ref mut leg) = record.stop_loss {
                        leg.status = ProtectionStatus::Confirmed;
                    }
                } else {
                    report.drifts.push(DriftEvent::new(
                        &symbol,
                        DriftKind::SizeMismatch,
                        format!("stop-loss sized {} against live {}", live_sl.size, position.size),
                    ));
                    let trigger = live_sl.trigger_price.unwrap_or_else(|| {
                        record.stop_loss.as_ref().map_or(Decimal::ZERO, |l| l.trigger_price)
                    });
                    match self.protection.replace_stop_loss(&mut record, trigger).await {
                        Ok(()) => report.repairs += 1,
                        Err(error) => {
                            warn!(
                                symbol = %symbol,
                                error = %error,
                                "stop-loss resize failed, closing position"
                            );
                            self.emergency
                                .close(&symbol, "stop-loss resize failed")
                                .await?;
                            report.emergencies.push(symbol.clone());
                            plan.archive = Some(ExitReason::Emergency);
                            if self.records.is_danger(&symbol).await {
                                plan.clear_danger = true;
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }

        match tp_order {
            None if record.take_profit.is_some() => {
                report.drifts.push(DriftEvent::new(
                    &symbol,
                    DriftKind::MissingTakeProfit,
                    "tracked take-profit not among live orders",
                ));
                let trigger = record.take_profit.as_ref().map(|l| l.trigger_price);
                record.take_profit = None;
                if let Some(trigger) = trigger {
                    match self
                        .protection
                        .place_leg(&record, ProtectionKind::TakeProfit, trigger)
                        .await
                    {
                        Ok(leg) => {
                            record.take_profit = Some(leg);
                            report.repairs += 1;
                        }
                        Err(error) => {
                            warn!(
                                symbol = %symbol,
                                error = %error,
                                "take-profit restore failed, position continues stop-only"
                            );
                        }
                    }
                }
            }
            Some(live_tp) if !self.protection.sizes_match(live_tp.size, position.size) => {
                report.drifts.push(DriftEvent::new(
                    &symbol,
                    DriftKind::SizeMismatch,
                    format!("take-profit sized {} against live {}", live_tp.size, position.size),
                ));
                let trigger = live_tp
                    .trigger_price
                    .or(record.take_profit.as_ref().map(|l| l.trigger_price));
                if let Some(trigger) = trigger {
                    match self.protection.replace_take_profit(&mut record, trigger).await {
                        Ok(()) => report.repairs += 1,
                        Err(error) => {
                            warn!(
                                symbol = %symbol,
                                error = %error,
                                "take-profit resize failed, position continues stop-only"
                            );
                        }
                    }
                }
            }
            _ => {}
        }

        let tracked_ids: Vec<String> = [&record.stop_loss, &record.take_profit]
            .into_iter()
            .flatten()
            .filter_map(|l| l.order_id.clone())
            .chain(snapshot_ids)
            .collect();
        for order in orders.iter().filter(|o| o.is_protection()) {
            if !tracked_ids.contains(&order.order_id) {
                report.drifts.push(DriftEvent::new(
                    &symbol,
                    DriftKind::DanglingProtection,
                    format!("untracked protection order {}", order.order_id),
                ));
                self.cancel_quietly(&symbol, &order.order_id).await?;
                report.repairs += 1;
            }
        }

        record.last_reconciled_at = Some(Utc::now());
        if record.has_confirmed_sl() && self.records.is_danger(&symbol).await {
            plan.clear_danger = true;
        }
        plan.upsert = Some(record);
        Ok(())
    }

    // ============================================
    // Commit
    // ============================================

    /// Apply the deferred local bookkeeping. Runs only once every symbol
    /// has been inspected.
    async fn commit(&self, plans: Vec<(String, SymbolPlan)>, report: &mut ReconcileReport) {
        for (symbol, plan) in plans {
            let _guard = self.locks.acquire(&symbol).await;

            if let Some(reason) = plan.archive {
                if let Some(record) = self.records.get(&symbol).await {
                    match self.coordinator.retire(record, reason).await {
                        Ok(()) => report.archived.push(symbol.clone()),
                        Err(error) => {
                            warn!(symbol = %symbol, error = %error, "archive failed at commit");
                        }
                    }
                }
            }
            if let Some(record) = plan.adopt {
                match self.records.upsert(record).await {
                    Ok(()) => report.adopted.push(symbol.clone()),
                    Err(error) => {
                        warn!(symbol = %symbol, error = %error, "adoption failed at commit");
                    }
                }
            }
            if let Some(record) = plan.upsert {
                // A concurrent fill may have retired the record between
                // inspection and commit; never resurrect it.
                if self.records.get(&symbol).await.is_some() {
                    if let Err(error) = self.records.upsert(record).await {
                        warn!(symbol = %symbol, error = %error, "record update failed at commit");
                    }
                }
            }
            if plan.clear_danger {
                match self.records.clear_danger(&symbol).await {
                    Ok(()) => report.danger_cleared.push(symbol.clone()),
                    Err(error) => {
                        warn!(symbol = %symbol, error = %error, "danger clear failed at commit");
                    }
                }
            }
        }
    }

    // ============================================
    // Helpers
    // ============================================

    fn leg_is_live(leg: &Option<ProtectionOrder>, orders: &[OpenOrder]) -> bool {
        Self::find_leg(leg, orders).is_some()
    }

    fn find_leg<'a>(
        leg: &Option<ProtectionOrder>,
        orders: &'a [OpenOrder],
    ) -> Option<&'a OpenOrder> {
        let id = leg.as_ref()?.order_id.as_deref()?;
        orders.iter().find(|o| o.order_id == id)
    }

    fn leg_from_order(kind: ProtectionKind, order: &OpenOrder) -> ProtectionOrder {
        ProtectionOrder {
            kind,
            symbol: order.symbol.clone(),
            trigger_price: order.trigger_price.unwrap_or_default(),
            size: order.size,
            reduce_only: order.reduce_only,
            order_id: Some(order.order_id.clone()),
            status: ProtectionStatus::Confirmed,
        }
    }

    fn safe_trigger(
        &self,
        instrument: &InstrumentSpec,
        direction: Direction,
        mark_price: Decimal,
    ) -> Decimal {
        let raw = match direction {
            Direction::Long => mark_price * (Decimal::ONE - self.config.safe_sl_pct),
            Direction::Short => mark_price * (Decimal::ONE + self.config.safe_sl_pct),
        };
        instrument.round_price(raw)
    }

    async fn cancel_quietly(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        match self.venue.cancel_order(symbol, order_id).await {
            Ok(()) | Err(VenueError::OrderNotFound { .. }) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
