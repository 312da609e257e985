//! Core domain models for the protection engine.
//!
//! Order primitives crossing the venue boundary, venue-reported positions,
//! the durable local protection records, and the push-event types.

mod events;
mod order;
mod position;

pub use events::{FillEvent, VenueEvent};
pub use order::{
    InstrumentSpec, OpenOrder, OrderAck, OrderCategory, OrderSide, OrderSpec, OrderStatus,
    OrderType, ProtectionKind,
};
pub use position::{
    ClosedRecord, DangerEntry, Direction, ExitReason, Position, PositionRecord, ProtectionOrder,
    ProtectionStatus, TrailingPhase, TrailingState,
};
