//! Position lifecycle coordination.
//!
//! [`ExecutionCoordinator`] owns the open-protected-close arc of a
//! position. The invariant it defends: a position either carries a
//! confirmed stop-loss, or it is being driven flat. Partial success while
//! opening is failure, and the rollback is an emergency close rather than
//! an optimistic wait.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::error::EngineError;
use crate::models::{
    Direction, ExitReason, FillEvent, OrderCategory, OrderSpec, PositionRecord,
};
use crate::venue::VenueClient;

use super::emergency::EmergencyCloseController;
use super::locks::SymbolLocks;
use super::protection::ProtectionManager;
use super::records::RecordStore;

/// A request to open a protected position.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Instrument symbol.
    pub symbol: String,
    /// Long or short.
    pub direction: Direction,
    /// Desired size, rounded down to the lot grid before submission.
    pub size: Decimal,
    /// Stop-loss distance override, as a fraction of entry price.
    pub stop_loss_pct: Option<Decimal>,
    /// Take-profit distance override, as a fraction of entry price.
    pub take_profit_pct: Option<Decimal>,
    /// Leverage override for the symbol.
    pub leverage: Option<u32>,
}

impl OpenRequest {
    /// A request using the configured protection distances and leverage.
    #[must_use]
    pub fn new(symbol: &str, direction: Direction, size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            size,
            stop_loss_pct: None,
            take_profit_pct: None,
            leverage: None,
        }
    }
}

/// Coordinates entry, protection, and close for tracked positions.
pub struct ExecutionCoordinator {
    venue: Arc<VenueClient>,
    protection: Arc<ProtectionManager>,
    emergency: Arc<EmergencyCloseController>,
    records: Arc<RecordStore>,
    locks: Arc<SymbolLocks>,
    config: ExecutionConfig,
}

impl ExecutionCoordinator {
    /// New coordinator.
    #[must_use]
    pub fn new(
        venue: Arc<VenueClient>,
        protection: Arc<ProtectionManager>,
        emergency: Arc<EmergencyCloseController>,
        records: Arc<RecordStore>,
        locks: Arc<SymbolLocks>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            venue,
            protection,
            emergency,
            records,
            locks,
            config,
        }
    }

    // ============================================
    // Open
    // ============================================

    /// Open a position and attach both protection legs, atomically from
    /// the caller's point of view: either the returned record carries a
    /// confirmed stop-loss and take-profit, or no position remains open.
    ///
    /// A transient failure on the entry submission itself can leave a
    /// fill the engine never saw; the reconciliation cycle adopts such
    /// positions from live state.
    pub async fn open_protected(&self, request: OpenRequest) -> Result<PositionRecord, EngineError> {
        let symbol = request.symbol.as_str();
        let now = Utc::now();

        if self.records.is_danger(symbol).await {
            return Err(EngineError::ProtectionGapFatal {
                symbol: symbol.to_string(),
                detail: "danger marker present, manual intervention required".to_string(),
            });
        }
        if self.records.is_disconnected() {
            return Err(EngineError::Disconnected);
        }
        if let Some(remaining) = self.records.cooldown_remaining(symbol, now).await {
            return Err(EngineError::Cooldown {
                symbol: symbol.to_string(),
                remaining_secs: remaining.num_seconds().max(0).unsigned_abs(),
            });
        }

        let _guard = self.locks.acquire(symbol).await;

        if self.records.get(symbol).await.is_some() {
            return Err(EngineError::PositionExists {
                symbol: symbol.to_string(),
            });
        }
        if let Some(live) = self.venue.get_position(symbol).await? {
            if !live.size.is_zero() {
                return Err(EngineError::StateDrift {
                    symbol: symbol.to_string(),
                    detail: format!(
                        "untracked live position of size {} exists, reconciliation must adopt it first",
                        live.size
                    ),
                });
            }
        }

        let instrument = self.venue.instrument(symbol).await?;
        let size = instrument.round_size_down(request.size);
        if size < instrument.min_size || size.is_zero() {
            return Err(EngineError::EntryRejected {
                symbol: symbol.to_string(),
                reason: format!(
                    "size {} rounds to {} which is below the minimum {}",
                    request.size, size, instrument.min_size
                ),
            });
        }

        if let Some(leverage) = request.leverage.or(self.config.default_leverage) {
            self.venue.set_leverage(symbol, leverage).await?;
        }

        let entry = OrderSpec::market_entry(symbol, request.direction.entry_side(), size);
        let ack = match self.venue.place_order(&entry).await {
            Ok(ack) => ack,
            Err(error) => {
                return Err(match EngineError::from(error) {
                    EngineError::DefinitiveRejection(source) => EngineError::EntryRejected {
                        symbol: symbol.to_string(),
                        reason: source.to_string(),
                    },
                    other => other,
                });
            }
        };

        let filled_size = if ack.filled_size.is_zero() { size } else { ack.filled_size };
        let entry_price = match ack.avg_fill_price {
            Some(price) if !price.is_zero() => price,
            _ => self.entry_price_from_live(symbol).await?,
        };

        let mut record = PositionRecord::new(symbol, request.direction, filled_size, entry_price);
        self.records.upsert(record.clone()).await?;
        info!(
            symbol = symbol,
            direction = %request.direction,
            size = %filled_size,
            entry_price = %entry_price,
            order_id = %ack.order_id,
            "entry filled, attaching protection"
        );

        let stop_loss_pct = request
            .stop_loss_pct
            .unwrap_or_else(|| self.protection.default_stop_loss_pct());
        let take_profit_pct = request
            .take_profit_pct
            .unwrap_or_else(|| self.protection.default_take_profit_pct());
        let (stop_trigger, profit_trigger) = ProtectionManager::protection_prices(
            &instrument,
            request.direction,
            entry_price,
            stop_loss_pct,
            take_profit_pct,
        );

        match self.protection.attach(&mut record, stop_trigger, profit_trigger).await {
            Ok(()) => {
                record.last_verified_at = Some(Utc::now());
                self.records.upsert(record.clone()).await?;
                info!(
                    symbol = symbol,
                    stop_trigger = %stop_trigger,
                    profit_trigger = %profit_trigger,
                    "position opened fully protected"
                );
                Ok(record)
            }
            Err(failure) => {
                self.records.upsert(record.clone()).await?;
                warn!(
                    symbol = symbol,
                    leg = %failure.kind,
                    error = %failure.error,
                    "protection attach failed, rolling back position"
                );
                self.emergency
                    .close(symbol, "protection attach failed")
                    .await?;
                self.retire(record, ExitReason::Emergency).await?;
                Err(EngineError::ProtectionFailed {
                    symbol: symbol.to_string(),
                    leg: failure.kind,
                    reason: failure.error.to_string(),
                })
            }
        }
    }

    /// Recover the entry price from the live position when the entry ack
    /// omitted it.
    async fn entry_price_from_live(&self, symbol: &str) -> Result<Decimal, EngineError> {
        for _ in 0..3 {
            if let Some(live) = self.venue.get_position(symbol).await? {
                if !live.entry_price.is_zero() {
                    return Ok(live.entry_price);
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Err(EngineError::StateDrift {
            symbol: symbol.to_string(),
            detail: "entry acknowledged but no live position with a fill price appeared".to_string(),
        })
    }

    // ============================================
    // Close
    // ============================================

    /// Close a position: flatten the live position first, then cancel the
    /// protection legs, then archive the record. Closing an already-flat
    /// symbol just tidies up and succeeds.
    pub async fn close_position(
        &self,
        symbol: &str,
        reason: ExitReason,
    ) -> Result<(), EngineError> {
        let _guard = self.locks.acquire(symbol).await;
        self.close_position_locked(symbol, reason).await
    }

    /// [`Self::close_position`] body, for callers already holding the
    /// symbol lock.
    pub(crate) async fn close_position_locked(
        &self,
        symbol: &str,
        reason: ExitReason,
    ) -> Result<(), EngineError> {
        let record = self.records.get(symbol).await;

        if let Some(live) = self.venue.get_position(symbol).await? {
            if !live.size.is_zero() {
                if let Some(ref tracked) = record {
                    if tracked.direction != live.direction {
                        warn!(
                            symbol = symbol,
                            tracked = %tracked.direction,
                            live = %live.direction,
                            "direction drift at close, flattening live position"
                        );
                    }
                }
                let close = OrderSpec::reduce_only_close(
                    symbol,
                    live.direction.closing_side(),
                    live.size,
                );
                if let Err(error) = self.venue.place_order(&close).await {
                    warn!(
                        symbol = symbol,
                        error = %error,
                        "close order failed, escalating to emergency close"
                    );
                    self.emergency.close(symbol, "ordinary close failed").await?;
                } else if let Some(still_open) = self.venue.get_position(symbol).await? {
                    if !still_open.size.is_zero() {
                        self.emergency
                            .close(symbol, "position still open after close order")
                            .await?;
                    }
                }
            }
        }

        if let Some(ref tracked) = record {
            if let Some(ref leg) = tracked.stop_loss {
                self.protection.cancel_leg(symbol, leg).await?;
            }
            if let Some(ref leg) = tracked.take_profit {
                self.protection.cancel_leg(symbol, leg).await?;
            }
        }
        self.protection.sweep_protection(symbol).await?;

        if let Some(record) = record {
            self.retire(record, reason).await?;
        }
        Ok(())
    }

    /// Emergency close a symbol and retire whatever record it had. The
    /// caller must already hold the symbol lock.
    pub(crate) async fn emergency_rollback(
        &self,
        symbol: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.emergency.close(symbol, reason).await?;
        if let Some(record) = self.records.get(symbol).await {
            self.retire(record, ExitReason::Emergency).await?;
        }
        Ok(())
    }

    /// Archive a record and start the post-exit cooldown.
    pub(crate) async fn retire(
        &self,
        record: PositionRecord,
        reason: ExitReason,
    ) -> Result<(), EngineError> {
        let symbol = record.symbol.clone();
        if let Some(closed) = self.records.archive(&symbol, reason).await? {
            info!(
                symbol = %symbol,
                exit_reason = %closed.exit_reason,
                held_secs = closed.closed_at.signed_duration_since(closed.record.opened_at).num_seconds(),
                "position retired"
            );
        }
        if self.config.cooldown_secs > 0 {
            let secs = i64::try_from(self.config.cooldown_secs).unwrap_or(i64::MAX);
            self.records
                .start_cooldown(&symbol, Utc::now() + Duration::seconds(secs))
                .await;
        }
        Ok(())
    }

    // ============================================
    // Push-event handling
    // ============================================

    /// React to a protection-leg fill: the position exited through its
    /// stop-loss or take-profit, so cancel the sibling leg and retire the
    /// record. Entry fills are confirmed inline by [`Self::open_protected`]
    /// and ignored here.
    pub async fn handle_fill(&self, fill: &FillEvent) -> Result<(), EngineError> {
        if fill.category != OrderCategory::Protection {
            debug!(symbol = %fill.symbol, order_id = %fill.order_id, "non-protection fill ignored");
            return Ok(());
        }

        let _guard = self.locks.acquire(&fill.symbol).await;
        let Some(mut record) = self.records.get(&fill.symbol).await else {
            debug!(symbol = %fill.symbol, "protection fill for untracked symbol");
            return Ok(());
        };

        let matches = |leg: &Option<crate::models::ProtectionOrder>| {
            leg.as_ref()
                .and_then(|l| l.order_id.as_deref())
                .is_some_and(|id| id == fill.order_id)
        };
        let reason = if matches(&record.stop_loss) {
            ExitReason::StopLoss
        } else if matches(&record.take_profit) {
            ExitReason::TakeProfit
        } else {
            ExitReason::External
        };

        if let Some(live) = self.venue.get_position(&fill.symbol).await? {
            if !live.size.is_zero() {
                // Partial exit: track the reduced size and let the
                // reconciliation cycle resize the remaining legs.
                info!(
                    symbol = %fill.symbol,
                    remaining = %live.size,
                    "protection leg partially filled, position reduced"
                );
                record.size = live.size;
                if reason == ExitReason::StopLoss {
                    record.stop_loss = None;
                } else if reason == ExitReason::TakeProfit {
                    record.take_profit = None;
                }
                self.records.upsert(record).await?;
                return Ok(());
            }
        }

        info!(
            symbol = %fill.symbol,
            exit_reason = %reason,
            fill_price = %fill.fill_price,
            "position exited through protection leg"
        );
        let sibling = match reason {
            ExitReason::StopLoss => record.take_profit.clone(),
            ExitReason::TakeProfit => record.stop_loss.clone(),
            _ => None,
        };
        if let Some(ref leg) = sibling {
            self.protection.cancel_leg(&fill.symbol, leg).await?;
        }
        self.protection.sweep_protection(&fill.symbol).await?;
        self.retire(record, reason).await
    }

    // ============================================
    // Max-hold sweep
    // ============================================

    /// Close positions held longer than the configured maximum. Returns
    /// the symbols that were closed.
    pub async fn sweep_max_hold(&self) -> Vec<String> {
        let Some(max_hold) = self.config.max_hold() else {
            return Vec::new();
        };
        let now = Utc::now();
        let mut closed = Vec::new();
        for record in self.records.all().await {
            if record.held_for(now) < max_hold {
                continue;
            }
            info!(
                symbol = %record.symbol,
                held_secs = record.held_for(now).num_seconds(),
                "max hold exceeded, closing position"
            );
            match self.close_position(&record.symbol, ExitReason::MaxHold).await {
                Ok(()) => closed.push(record.symbol),
                Err(error) => {
                    warn!(symbol = %record.symbol, error = %error, "max-hold close failed");
                }
            }
        }
        closed
    }
}
