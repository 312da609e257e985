// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Protection Engine - Position Lifecycle Core Library
//!
//! Keeps leveraged positions protected on a derivatives venue: a
//! position either carries confirmed stop-loss and take-profit legs or
//! it is closed.
//!
//! # Layers (inside → outside)
//!
//! - **Models**: domain types shared by every layer
//!   - `order`: order specs, acks, open orders, instrument grids
//!   - `position`: position records, protection legs, trailing state
//!   - `events`: fills and stream lifecycle events
//!
//! - **Venue**: the boundary to the exchange
//!   - `adapter`: the `VenueGateway` trait every venue binding implements
//!   - `retry`: rate-limit-aware retry client wrapping any gateway
//!   - `paper`: in-process simulated venue for paper trading and tests
//!
//! - **Execution**: lifecycle orchestration
//!   - `coordinator`: atomic open-with-protection, closes, fills
//!   - `protection`: stop-loss / take-profit leg placement and repair
//!   - `trailing`: ratcheting stop state machine
//!   - `emergency`: bounded force-close with danger markers
//!   - `reconciliation`: startup and heartbeat drift repair
//!   - `records`: durable position records and danger markers

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Configuration loading and validation.
pub mod config;

/// Engine-level error taxonomy.
pub mod error;

/// Execution layer - lifecycle orchestration over the venue boundary.
pub mod execution;

/// Domain types shared by every layer.
pub mod models;

/// Logging initialization.
pub mod observability;

/// Venue boundary - gateway trait, retry client, paper venue.
pub mod venue;

pub use config::{Config, ConfigError, load_config, load_config_from_string};
pub use error::EngineError;
pub use execution::{Engine, OpenRequest, ReconcileReport};
pub use models::{Direction, ExitReason, PositionRecord};
pub use venue::{PaperVenue, VenueClient, VenueError, VenueGateway};
