//! Rate-limit-aware retry layer for venue calls.
//!
//! Every venue invocation made by the engine passes through
//! [`VenueClient`]. Rate limits and transient failures are absorbed here
//! with bounded exponential backoff and never reach business logic;
//! definitive rejections return immediately because retrying cannot change
//! the outcome. The client also enforces the tick/lot grid precondition on
//! submitted orders: rounding happens at the call site, and unaligned
//! inputs are rejected rather than silently rounded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{RwLock, broadcast};
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::models::{InstrumentSpec, OpenOrder, OrderAck, OrderSpec, Position, VenueEvent};

use super::adapter::VenueGateway;
use super::types::VenueError;

// ============================================
// Policy
// ============================================

/// Retry policy for venue calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed when the venue rate-limits (first call
    /// included).
    pub max_rate_limit_attempts: u32,
    /// Total attempts allowed on transient failures (timeouts, transport).
    pub max_transient_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Random jitter applied to each delay, as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Bounded timeout applied to every network call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_attempts: 5,
            max_transient_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            call_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================
// Classification
// ============================================

/// How the retry loop treats a venue error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with escalating backoff, up to the rate-limit bound.
    RateLimited,
    /// Retry a smaller fixed number of times.
    Transient,
    /// Return immediately; retrying will not change the outcome.
    Definitive,
}

/// Classify a venue error for retry handling.
#[must_use]
pub const fn classify(error: &VenueError) -> ErrorClass {
    match error {
        VenueError::RateLimited { .. } => ErrorClass::RateLimited,
        VenueError::Transport(_) | VenueError::Timeout => ErrorClass::Transient,
        VenueError::Rejected { .. }
        | VenueError::OrderNotFound { .. }
        | VenueError::UnknownInstrument(_)
        | VenueError::UnroundedPrice { .. }
        | VenueError::UnroundedSize { .. } => ErrorClass::Definitive,
    }
}

// ============================================
// Backoff schedule
// ============================================

/// Per-operation attempt counter and delay calculator.
///
/// Created fresh for each logical operation and discarded on success or
/// exhaustion.
#[derive(Debug)]
pub struct BackoffSchedule {
    policy: RetryPolicy,
    attempts: u32,
}

impl BackoffSchedule {
    /// Create a schedule for one logical operation.
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            policy: policy.clone(),
            attempts: 0,
        }
    }

    /// Attempts made so far (failed calls recorded via [`Self::next_delay`]).
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and return the delay before the next one,
    /// or `None` when the bound for this error class is exhausted.
    pub fn next_delay(&mut self, error: &VenueError) -> Option<Duration> {
        let bound = match classify(error) {
            ErrorClass::RateLimited => self.policy.max_rate_limit_attempts,
            ErrorClass::Transient => self.policy.max_transient_attempts,
            ErrorClass::Definitive => return None,
        };

        self.attempts += 1;
        if self.attempts >= bound {
            return None;
        }

        let exp = self.policy.backoff_multiplier.powf(f64::from(self.attempts - 1));
        let mut delay = self.policy.initial_backoff.mul_f64(exp.max(1.0));
        if delay > self.policy.max_backoff {
            delay = self.policy.max_backoff;
        }

        // Honor a server-provided wait hint when it is longer than ours.
        if let VenueError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            let hinted = Duration::from_secs(*secs);
            if hinted > delay {
                delay = hinted.min(self.policy.max_backoff);
            }
        }

        if self.policy.jitter_factor > 0.0 {
            let spread = self.policy.jitter_factor;
            let factor = rand::rng().random_range(-spread..=spread);
            delay = delay.mul_f64((1.0 + factor).max(0.0));
        }

        Some(delay)
    }
}

// ============================================
// Client
// ============================================

/// Engine-facing venue client.
///
/// Wraps a [`VenueGateway`] so that every call carries a bounded timeout
/// and the retry policy, and every submitted order is checked against the
/// instrument grids before it leaves the process. Instrument metadata is
/// cached; positions and orders never are.
pub struct VenueClient {
    gateway: Arc<dyn VenueGateway>,
    policy: RetryPolicy,
    instruments: RwLock<HashMap<String, InstrumentSpec>>,
}

impl VenueClient {
    /// Create a client over a gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn VenueGateway>, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            policy,
            instruments: RwLock::new(HashMap::new()),
        }
    }

    /// Short venue name for logging.
    #[must_use]
    pub fn venue_name(&self) -> &'static str {
        self.gateway.venue_name()
    }

    /// Subscribe to the venue's push-event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VenueEvent> {
        self.gateway.subscribe()
    }

    /// Live position for one symbol.
    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>, VenueError> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = symbol.to_string();
        self.call("get_position", move || {
            let gateway = Arc::clone(&gateway);
            let symbol = symbol.clone();
            async move { gateway.get_position(&symbol).await }
        })
        .await
    }

    /// All live positions with nonzero size.
    pub async fn get_positions(&self) -> Result<Vec<Position>, VenueError> {
        let gateway = Arc::clone(&self.gateway);
        self.call("get_positions", move || {
            let gateway = Arc::clone(&gateway);
            async move { gateway.get_positions().await }
        })
        .await
    }

    /// Live open orders for one symbol.
    pub async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, VenueError> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = symbol.to_string();
        self.call("get_open_orders", move || {
            let gateway = Arc::clone(&gateway);
            let symbol = symbol.clone();
            async move { gateway.get_open_orders(&symbol).await }
        })
        .await
    }

    /// Submit an order after verifying it sits on the instrument grids.
    pub async fn place_order(&self, spec: &OrderSpec) -> Result<OrderAck, VenueError> {
        let instrument = self.instrument(&spec.symbol).await?;
        check_grid(spec, &instrument)?;

        let gateway = Arc::clone(&self.gateway);
        let spec = spec.clone();
        self.call("place_order", move || {
            let gateway = Arc::clone(&gateway);
            let spec = spec.clone();
            async move { gateway.place_order(&spec).await }
        })
        .await
    }

    /// Cancel one order by venue id.
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), VenueError> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = symbol.to_string();
        let order_id = order_id.to_string();
        self.call("cancel_order", move || {
            let gateway = Arc::clone(&gateway);
            let symbol = symbol.clone();
            let order_id = order_id.clone();
            async move { gateway.cancel_order(&symbol, &order_id).await }
        })
        .await
    }

    /// Instrument metadata, cached after the first successful fetch.
    pub async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec, VenueError> {
        if let Some(spec) = self.instruments.read().await.get(symbol) {
            return Ok(spec.clone());
        }

        let gateway = Arc::clone(&self.gateway);
        let owned = symbol.to_string();
        let fetched = self
            .call("instrument", move || {
                let gateway = Arc::clone(&gateway);
                let symbol = owned.clone();
                async move { gateway.instrument(&symbol).await }
            })
            .await?;

        self.instruments
            .write()
            .await
            .insert(symbol.to_string(), fetched.clone());
        Ok(fetched)
    }

    /// Set position leverage for a symbol.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError> {
        let gateway = Arc::clone(&self.gateway);
        let symbol = symbol.to_string();
        self.call("set_leverage", move || {
            let gateway = Arc::clone(&gateway);
            let symbol = symbol.clone();
            async move { gateway.set_leverage(&symbol, leverage).await }
        })
        .await
    }

    /// Check venue connectivity.
    pub async fn health_check(&self) -> Result<(), VenueError> {
        let gateway = Arc::clone(&self.gateway);
        self.call("health_check", move || {
            let gateway = Arc::clone(&gateway);
            async move { gateway.health_check().await }
        })
        .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, VenueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let mut schedule = BackoffSchedule::new(&self.policy);
        loop {
            let result = match timeout(self.policy.call_timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(VenueError::Timeout),
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match schedule.next_delay(&error) {
                Some(delay) => {
                    warn!(
                        operation = operation,
                        attempt = schedule.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "venue call failed, backing off"
                    );
                    sleep(delay).await;
                }
                None => {
                    if classify(&error) != ErrorClass::Definitive {
                        warn!(
                            operation = operation,
                            attempts = schedule.attempts(),
                            error = %error,
                            "venue call failed, retries exhausted"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Verify every price and size in a spec sits on the instrument grids.
fn check_grid(spec: &OrderSpec, instrument: &InstrumentSpec) -> Result<(), VenueError> {
    for price in [spec.limit_price, spec.trigger_price].into_iter().flatten() {
        if !instrument.price_on_grid(price) {
            return Err(VenueError::UnroundedPrice {
                price,
                tick_size: instrument.tick_size,
            });
        }
    }
    if !instrument.size_on_grid(spec.size) {
        return Err(VenueError::UnroundedSize {
            size: spec.size,
            lot_size: instrument.lot_size,
        });
    }
    Ok(())
}
