//! Engine error taxonomy.
//!
//! Every fallible operation surfaces one of these variants so callers can
//! branch on the class of failure rather than parse messages. Venue errors
//! arrive here only after the retry layer has exhausted its budget, at
//! which point they collapse into the transient / rate-limited / definitive
//! triple.

use thiserror::Error;

use crate::execution::persistence::PersistenceError;
use crate::models::ProtectionKind;
use crate::venue::retry::classify;
use crate::venue::{ErrorClass, VenueError};

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the protection engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A venue call failed with a retryable network fault and the retry
    /// budget ran out.
    #[error("transient venue failure: {0}")]
    TransientNetwork(VenueError),

    /// The venue kept rate limiting past the backoff budget.
    #[error("venue rate limit persisted past backoff budget: {0}")]
    RateLimited(VenueError),

    /// The venue rejected the request outright; retrying cannot help.
    #[error("definitive venue rejection: {0}")]
    DefinitiveRejection(VenueError),

    /// The entry order itself was rejected. No position was opened and
    /// nothing needs rolling back.
    #[error("entry rejected for {symbol}: {reason}")]
    EntryRejected {
        /// Instrument symbol.
        symbol: String,
        /// Venue-supplied rejection reason.
        reason: String,
    },

    /// A protection leg could not be placed after the entry filled. The
    /// position has been emergency closed.
    #[error("{leg} placement failed for {symbol}, position emergency closed: {reason}")]
    ProtectionFailed {
        /// Instrument symbol.
        symbol: String,
        /// Which protection leg failed.
        leg: ProtectionKind,
        /// What went wrong with the leg.
        reason: String,
    },

    /// The emergency close controller exhausted its attempts with the
    /// position still open. A danger marker has been persisted.
    #[error("emergency close failed for {symbol} after {attempts} attempts")]
    EmergencyCloseFailed {
        /// Instrument symbol.
        symbol: String,
        /// Close attempts made before giving up.
        attempts: u32,
    },

    /// Local records and venue state disagree in a way the caller must
    /// know about.
    #[error("state drift on {symbol}: {detail}")]
    StateDrift {
        /// Instrument symbol.
        symbol: String,
        /// Human-readable description of the disagreement.
        detail: String,
    },

    /// A position is live without a working stop-loss and automated
    /// remediation failed. Manual intervention required.
    #[error("unprotected position on {symbol}: {detail}")]
    ProtectionGapFatal {
        /// Instrument symbol.
        symbol: String,
        /// Why the gap could not be closed automatically.
        detail: String,
    },

    /// The symbol is inside its post-exit cooldown window.
    #[error("{symbol} in cooldown for another {remaining_secs}s")]
    Cooldown {
        /// Instrument symbol.
        symbol: String,
        /// Seconds until the cooldown expires.
        remaining_secs: u64,
    },

    /// The push-event stream is down, so fills cannot be observed.
    #[error("venue event stream disconnected")]
    Disconnected,

    /// An open position record already exists for the symbol.
    #[error("position already open for {symbol}")]
    PositionExists {
        /// Instrument symbol.
        symbol: String,
    },

    /// Reading or writing the persisted state store failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<VenueError> for EngineError {
    fn from(error: VenueError) -> Self {
        match classify(&error) {
            ErrorClass::RateLimited => Self::RateLimited(error),
            ErrorClass::Transient => Self::TransientNetwork(error),
            ErrorClass::Definitive => Self::DefinitiveRejection(error),
        }
    }
}

impl EngineError {
    /// Whether retrying the whole operation later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::RateLimited(_) | Self::Disconnected
        )
    }
}
