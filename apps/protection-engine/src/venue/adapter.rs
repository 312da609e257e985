//! Venue gateway trait.
//!
//! The single boundary through which the engine talks to a trading venue.
//! Implementations are opaque RPC clients; the engine treats their
//! responses as authoritative truth whenever they are reachable.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::models::{InstrumentSpec, OpenOrder, OrderAck, OrderSpec, Position, VenueEvent};

use super::types::VenueError;

/// Adapter for one trading venue.
///
/// All engine calls reach implementations through the retry layer
/// ([`super::VenueClient`]); nothing else in the engine may hold an
/// implementation directly.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Live position for one symbol. `Ok(None)` means the venue
    /// authoritatively reports flat; a transport failure is `Err` and must
    /// never be collapsed into `None`.
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, VenueError>;

    /// All live positions with nonzero size.
    async fn get_positions(&self) -> Result<Vec<Position>, VenueError>;

    /// Live open orders for one symbol, trigger orders included.
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, VenueError>;

    /// Submit an order. Prices and sizes in `spec` must already be aligned
    /// to the instrument grids.
    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, VenueError>;

    /// Cancel one order by venue id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError>;

    /// Static instrument metadata (tick size, lot size, minimums).
    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, VenueError>;

    /// Set position leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError>;

    /// Subscribe to the push-event stream (fills, disconnects, reconnects).
    fn subscribe(&self) -> broadcast::Receiver<VenueEvent>;

    /// Short venue name for logging.
    fn venue_name(&self) -> &'static str;

    /// Check venue connectivity.
    async fn health_check(&self) -> Result<(), VenueError>;
}
