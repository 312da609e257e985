//! Execution layer.
//!
//! The modules here own the lifecycle of leveraged positions: the
//! coordinator opens and closes them, the protection manager keeps their
//! stop-loss and take-profit legs true, reconciliation repairs drift
//! against live venue state, the trailing manager walks stops behind
//! winners, and the emergency controller is the path of last resort.
//! [`Engine`] wires it all together for the daemon.

pub mod coordinator;
pub mod emergency;
pub mod engine;
pub mod locks;
pub mod persistence;
pub mod protection;
pub mod reconciliation;
pub mod records;
pub mod trailing;

pub use coordinator::{ExecutionCoordinator, OpenRequest};
pub use emergency::EmergencyCloseController;
pub use engine::Engine;
pub use locks::SymbolLocks;
pub use persistence::{PersistenceError, StateStore};
pub use protection::{LegFailure, ProtectionManager, SplitLegs, VerifyOutcome, split_legs};
pub use reconciliation::{DriftEvent, DriftKind, DriftSeverity, ReconcileReport, ReconciliationEngine};
pub use records::RecordStore;
pub use trailing::{TrailingOutcome, TrailingStopManager, advance_trigger};
