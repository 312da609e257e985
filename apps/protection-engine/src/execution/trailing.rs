//! Trailing stop management.
//!
//! Once a position shows enough unrealized gain the stop-loss starts
//! following the best price seen since arming. The trigger only ever
//! tightens: every replacement must improve on the current trigger by at
//! least one tick and stay on the protective side of the mark, so a
//! pullback can never widen the loss the stop admits. Replacing the leg
//! is cancel-then-place; if the place half fails the position is
//! unprotected and gets emergency closed on the spot.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::TrailingConfig;
use crate::error::EngineError;
use crate::models::{Direction, TrailingPhase};
use crate::venue::VenueClient;

use super::coordinator::ExecutionCoordinator;
use super::locks::SymbolLocks;
use super::protection::ProtectionManager;
use super::records::RecordStore;

/// What one trailing evaluation did for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingOutcome {
    /// Not armed and below the arm threshold, or nothing tracked.
    Idle,
    /// Gain crossed the arm threshold; now following the best mark.
    Armed,
    /// Armed or trailing, but the candidate trigger was no tighter.
    Held,
    /// Stop-loss replaced at a tighter trigger.
    Tightened,
    /// Replacement failed and the position was emergency closed.
    Closed,
}

/// Compute the next stop trigger from the best favorable mark, or `None`
/// when no strictly-tighter protective trigger exists.
///
/// The candidate trails the best mark by `trail_pct`, floored at entry so
/// an armed position can no longer round-trip into a loss. It is accepted
/// only if it improves on `current_trigger` by at least one tick and sits
/// on the protective side of the present mark.
#[must_use]
pub fn advance_trigger(
    direction: Direction,
    entry_price: Decimal,
    best_mark: Decimal,
    current_trigger: Decimal,
    mark: Decimal,
    trail_pct: Decimal,
    tick_size: Decimal,
) -> Option<Decimal> {
    let candidate = match direction {
        Direction::Long => (best_mark * (Decimal::ONE - trail_pct)).max(entry_price),
        Direction::Short => (best_mark * (Decimal::ONE + trail_pct)).min(entry_price),
    };
    let steps = (candidate / tick_size).round_dp_with_strategy(
        0,
        rust_decimal::RoundingStrategy::MidpointAwayFromZero,
    );
    let candidate = (steps * tick_size).normalize();

    let accepted = match direction {
        Direction::Long => candidate >= current_trigger + tick_size && candidate < mark,
        Direction::Short => candidate <= current_trigger - tick_size && candidate > mark,
    };
    accepted.then_some(candidate)
}

/// Moves stop-losses up behind winning positions.
pub struct TrailingStopManager {
    venue: Arc<VenueClient>,
    protection: Arc<ProtectionManager>,
    coordinator: Arc<ExecutionCoordinator>,
    records: Arc<RecordStore>,
    locks: Arc<SymbolLocks>,
    config: TrailingConfig,
}

impl TrailingStopManager {
    /// New manager.
    #[must_use]
    pub fn new(
        venue: Arc<VenueClient>,
        protection: Arc<ProtectionManager>,
        coordinator: Arc<ExecutionCoordinator>,
        records: Arc<RecordStore>,
        locks: Arc<SymbolLocks>,
        config: TrailingConfig,
    ) -> Self {
        Self {
            venue,
            protection,
            coordinator,
            records,
            locks,
            config,
        }
    }

    /// Evaluate one symbol against the live mark.
    pub async fn evaluate_symbol(&self, symbol: &str) -> Result<TrailingOutcome, EngineError> {
        let _guard = self.locks.acquire(symbol).await;

        let Some(mut record) = self.records.get(symbol).await else {
            return Ok(TrailingOutcome::Idle);
        };
        if !record.has_confirmed_sl() {
            // An unprotected position belongs to reconciliation, not here.
            return Ok(TrailingOutcome::Idle);
        }
        let Some(position) = self.venue.get_position(symbol).await? else {
            return Ok(TrailingOutcome::Idle);
        };
        if position.size.is_zero() {
            return Ok(TrailingOutcome::Idle);
        }
        let mark = position.mark_price;

        if record.trailing.phase == TrailingPhase::Inactive {
            if position.gain_pct() < self.config.arm_threshold_pct {
                return Ok(TrailingOutcome::Idle);
            }
            record.trailing.phase = TrailingPhase::Armed;
            record.trailing.high_water_mark = Some(mark);
            self.records.upsert(record).await?;
            info!(symbol = symbol, mark = %mark, "trailing stop armed");
            return Ok(TrailingOutcome::Armed);
        }

        let best_mark = match record.trailing.high_water_mark {
            Some(best) => match record.direction {
                Direction::Long => best.max(mark),
                Direction::Short => best.min(mark),
            },
            None => mark,
        };
        if record.trailing.high_water_mark != Some(best_mark) {
            record.trailing.high_water_mark = Some(best_mark);
            self.records.upsert(record.clone()).await?;
        }

        let Some(current_trigger) = record.stop_loss.as_ref().map(|l| l.trigger_price) else {
            return Ok(TrailingOutcome::Idle);
        };
        let instrument = self.venue.instrument(symbol).await?;
        let Some(new_trigger) = advance_trigger(
            record.direction,
            record.entry_price,
            best_mark,
            current_trigger,
            mark,
            self.config.trail_pct,
            instrument.tick_size,
        ) else {
            debug!(symbol = symbol, best_mark = %best_mark, "trailing candidate not tighter, holding");
            return Ok(TrailingOutcome::Held);
        };

        match self.protection.replace_stop_loss(&mut record, new_trigger).await {
            Ok(()) => {
                record.trailing.phase = TrailingPhase::Trailing;
                record.trailing.current_sl = Some(new_trigger);
                self.records.upsert(record).await?;
                info!(
                    symbol = symbol,
                    from = %current_trigger,
                    to = %new_trigger,
                    "trailing stop tightened"
                );
                Ok(TrailingOutcome::Tightened)
            }
            Err(error) => {
                warn!(
                    symbol = symbol,
                    error = %error,
                    "trailing replacement left position unprotected, emergency closing"
                );
                self.records.upsert(record).await?;
                self.coordinator
                    .emergency_rollback(symbol, "trailing stop replacement failed")
                    .await?;
                Ok(TrailingOutcome::Closed)
            }
        }
    }

    /// Evaluate every tracked symbol. Failures are logged per symbol and
    /// do not stop the sweep.
    pub async fn sweep(&self) -> Vec<(String, TrailingOutcome)> {
        let mut outcomes = Vec::new();
        for symbol in self.records.symbols().await {
            match self.evaluate_symbol(&symbol).await {
                Ok(outcome) => {
                    if outcome != TrailingOutcome::Idle {
                        outcomes.push((symbol, outcome));
                    }
                }
                Err(error) => {
                    warn!(symbol = %symbol, error = %error, "trailing evaluation failed");
                }
            }
        }
        outcomes
    }
}
