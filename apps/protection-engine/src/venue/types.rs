//! Error types for the venue gateway boundary.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur when talking to the venue.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Transport-level failure (connection refused, reset, DNS).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The call exceeded its bounded timeout. Classified as transient: a
    /// timed-out order may or may not exist, which is not the same as
    /// "order does not exist".
    #[error("venue call timed out")]
    Timeout,

    /// The venue rate-limited the request.
    #[error("rate limited by venue (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Server-suggested wait, when the venue provided one.
        retry_after_secs: Option<u64>,
    },

    /// Definitive rejection: the parameters are wrong or the account/market
    /// state forbids the action. Retrying will not change the outcome.
    #[error("rejected by venue [{code}]: {reason}")]
    Rejected {
        /// Venue rejection code.
        code: String,
        /// Venue rejection reason.
        reason: String,
    },

    /// The referenced order does not exist on the venue.
    #[error("order {order_id} not found on venue")]
    OrderNotFound {
        /// The order id that was queried.
        order_id: String,
    },

    /// The instrument is unknown to the venue.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// A price was submitted that does not sit on the instrument's tick
    /// grid. Rounding happens at the call site; the gateway layer only
    /// verifies.
    #[error("price {price} is not aligned to tick size {tick_size}")]
    UnroundedPrice {
        /// The offending price.
        price: Decimal,
        /// The instrument's tick size.
        tick_size: Decimal,
    },

    /// A size was submitted that does not sit on the instrument's lot grid.
    #[error("size {size} is not aligned to lot size {lot_size}")]
    UnroundedSize {
        /// The offending size.
        size: Decimal,
        /// The instrument's lot size.
        lot_size: Decimal,
    },
}

impl VenueError {
    /// Convenience constructor for a definitive rejection.
    #[must_use]
    pub fn rejected(code: &str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a venue rate limit.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
