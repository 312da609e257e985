//! Venue boundary.
//!
//! Everything the engine knows about the remote venue lives behind the
//! [`VenueGateway`] trait. [`VenueClient`] wraps a gateway with the retry
//! and backpressure policy so callers above this module never see a rate
//! limit, and [`PaperVenue`] is the in-process implementation used for
//! paper trading and tests.

pub mod adapter;
pub mod paper;
pub mod retry;
pub mod types;

pub use adapter::VenueGateway;
pub use paper::PaperVenue;
pub use retry::{BackoffSchedule, ErrorClass, RetryPolicy, VenueClient};
pub use types::VenueError;
