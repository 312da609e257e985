//! Emergency position close.
//!
//! The last line of defense when a position cannot be protected. The
//! controller re-queries the live position before every attempt so it
//! always acts on current truth: a position that is already flat is
//! success, whatever earlier attempts looked like. Closes are reduce-only
//! at the live size, so a fill that raced in between attempts can only
//! shrink the order, never flip the position.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::EmergencyConfig;
use crate::error::EngineError;
use crate::models::{DangerEntry, OrderSpec};
use crate::venue::VenueClient;

use super::protection::ProtectionManager;
use super::records::RecordStore;

/// Drives a position flat when protection cannot be maintained.
pub struct EmergencyCloseController {
    venue: Arc<VenueClient>,
    protection: Arc<ProtectionManager>,
    records: Arc<RecordStore>,
    config: EmergencyConfig,
}

impl EmergencyCloseController {
    /// New controller.
    #[must_use]
    pub fn new(
        venue: Arc<VenueClient>,
        protection: Arc<ProtectionManager>,
        records: Arc<RecordStore>,
        config: EmergencyConfig,
    ) -> Self {
        Self {
            venue,
            protection,
            records,
            config,
        }
    }

    /// Close the position on `symbol`, retrying until flat or the attempt
    /// budget runs out. On exhaustion a danger marker is persisted and
    /// [`EngineError::EmergencyCloseFailed`] is returned.
    pub async fn close(&self, symbol: &str, reason: &str) -> Result<(), EngineError> {
        warn!(symbol = symbol, reason = reason, "emergency close engaged");

        let mut last_seen_size: Option<Decimal> = None;

        for attempt in 0..=self.config.max_attempts {
            match self.venue.get_position(symbol).await {
                Ok(None) => return self.finish_flat(symbol).await,
                Ok(Some(position)) if position.size.is_zero() => {
                    return self.finish_flat(symbol).await;
                }
                Ok(Some(position)) => {
                    last_seen_size = Some(position.size);
                    if attempt == self.config.max_attempts {
                        break;
                    }
                    let spec = OrderSpec::reduce_only_close(
                        symbol,
                        position.direction.closing_side(),
                        position.size,
                    );
                    match self.venue.place_order(&spec).await {
                        Ok(ack) => {
                            info!(
                                symbol = symbol,
                                attempt = attempt + 1,
                                order_id = %ack.order_id,
                                size = %position.size,
                                "emergency close order submitted"
                            );
                        }
                        Err(error) => {
                            warn!(
                                symbol = symbol,
                                attempt = attempt + 1,
                                error = %error,
                                "emergency close order failed"
                            );
                        }
                    }
                }
                Err(error) => {
                    if attempt == self.config.max_attempts {
                        break;
                    }
                    warn!(
                        symbol = symbol,
                        attempt = attempt + 1,
                        error = %error,
                        "could not read live position during emergency close"
                    );
                }
            }
            sleep(self.backoff(attempt)).await;
        }

        let live_size = match last_seen_size {
            Some(size) => size,
            None => self
                .records
                .get(symbol)
                .await
                .map_or(Decimal::ZERO, |r| r.size),
        };
        error!(
            symbol = symbol,
            attempts = self.config.max_attempts,
            live_size = %live_size,
            "emergency close exhausted, position still open"
        );
        self.records
            .mark_danger(DangerEntry {
                symbol: symbol.to_string(),
                reason: format!("emergency close exhausted: {reason}"),
                live_size,
                recorded_at: Utc::now(),
            })
            .await?;

        Err(EngineError::EmergencyCloseFailed {
            symbol: symbol.to_string(),
            attempts: self.config.max_attempts,
        })
    }

    /// The position is flat. Sweep any dangling protection legs, but a
    /// sweep failure never turns a successful close into an error.
    async fn finish_flat(&self, symbol: &str) -> Result<(), EngineError> {
        info!(symbol = symbol, "position flat after emergency close");
        if let Err(error) = self.protection.sweep_protection(symbol).await {
            warn!(
                symbol = symbol,
                error = %error,
                "could not sweep protection after emergency close"
            );
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> std::time::Duration {
        self.config
            .initial_backoff()
            .mul_f64(self.config.backoff_multiplier.powf(f64::from(attempt)))
    }
}
