//! Reconciliation report types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How serious a drift between local records and venue state is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
    /// Expected bookkeeping, such as archiving an exited position.
    Info,
    /// Needs repair but the position is still protected.
    Warning,
    /// An open position without a working stop-loss.
    Critical,
}

/// The kind of disagreement found between a record and live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftKind {
    /// The tracked stop-loss is not among live orders.
    MissingStopLoss,
    /// The tracked take-profit is not among live orders.
    MissingTakeProfit,
    /// A protection leg's size no longer matches the live position.
    SizeMismatch,
    /// The record's live position is gone.
    PositionGoneLocalStale,
    /// A live position exists with no local record.
    UntrackedPosition,
    /// A protection order on the venue that nothing tracks.
    DanglingProtection,
}

impl DriftKind {
    /// Severity used for logging and report triage.
    #[must_use]
    pub const fn severity(self) -> DriftSeverity {
        match self {
            Self::MissingStopLoss => DriftSeverity::Critical,
            Self::MissingTakeProfit | Self::SizeMismatch | Self::UntrackedPosition => {
                DriftSeverity::Warning
            }
            Self::PositionGoneLocalStale | Self::DanglingProtection => DriftSeverity::Info,
        }
    }
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MissingStopLoss => "MISSING_STOP_LOSS",
            Self::MissingTakeProfit => "MISSING_TAKE_PROFIT",
            Self::SizeMismatch => "SIZE_MISMATCH",
            Self::PositionGoneLocalStale => "POSITION_GONE_LOCAL_STALE",
            Self::UntrackedPosition => "UNTRACKED_POSITION",
            Self::DanglingProtection => "DANGLING_PROTECTION",
        };
        write!(f, "{name}")
    }
}

/// One observed drift.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEvent {
    /// Instrument symbol.
    pub symbol: String,
    /// What kind of drift.
    pub kind: DriftKind,
    /// Human-readable specifics.
    pub detail: String,
    /// When the drift was observed.
    pub detected_at: DateTime<Utc>,
}

impl DriftEvent {
    /// New drift event stamped now.
    #[must_use]
    pub fn new(symbol: &str, kind: DriftKind, detail: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            detail: detail.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Result of one full reconciliation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Symbols examined this cycle.
    pub symbols_checked: usize,
    /// Every drift observed.
    pub drifts: Vec<DriftEvent>,
    /// Venue-side repairs performed (legs placed, replaced, cancelled).
    pub repairs: usize,
    /// Symbols that were emergency closed.
    pub emergencies: Vec<String>,
    /// Symbols adopted from live state.
    pub adopted: Vec<String>,
    /// Symbols whose records were archived.
    pub archived: Vec<String>,
    /// Danger markers cleared after verification.
    pub danger_cleared: Vec<String>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration of the cycle.
    pub duration_ms: u64,
}

impl ReconcileReport {
    /// Whether any critical drift was observed.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.drifts
            .iter()
            .any(|d| d.kind.severity() == DriftSeverity::Critical)
    }

    /// Whether the cycle found local and venue state in full agreement.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checked {} symbols, {} drifts, {} repairs, {} emergencies, {} adopted, {} archived in {}ms",
            self.symbols_checked,
            self.drifts.len(),
            self.repairs,
            self.emergencies.len(),
            self.adopted.len(),
            self.archived.len(),
            self.duration_ms
        )
    }
}
