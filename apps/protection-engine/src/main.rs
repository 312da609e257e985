//! Protection Engine Binary
//!
//! Starts the position lifecycle and protection daemon.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin protection-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CONFIG_PATH`: Path to the YAML config file (default: config.yaml,
//!   falling back to built-in defaults when absent)
//! - `RUST_LOG`: Log level filter (overrides `logging.level`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use protection_engine::config::{self, Config};
use protection_engine::execution::Engine;
use protection_engine::observability;
use protection_engine::venue::{PaperVenue, VenueGateway};
use tokio::signal;
use tokio::task::JoinHandle;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_engine_config()?;
    observability::init_logging(&config.logging);

    tracing::info!("Starting protection engine");
    log_config(&config);

    anyhow::ensure!(
        config.engine.is_paper(),
        "LIVE mode requires an external venue gateway binding; this build ships the paper venue only"
    );

    let venue = create_paper_venue(&config).await;
    let engine = Arc::new(
        Engine::new(Arc::clone(&venue) as Arc<dyn VenueGateway>, &config)
            .context("failed to assemble engine")?,
    );

    // Nothing trades until the persisted records agree with the venue.
    let report = engine
        .bootstrap()
        .await
        .context("startup reconciliation failed")?;
    tracing::info!(report = %report, "startup reconciliation complete");

    let heartbeat = spawn_heartbeat(Arc::clone(&engine), config.reconciliation.interval_secs);
    let event_pump = spawn_event_pump(Arc::clone(&engine));

    tracing::info!("Protection engine ready");

    shutdown_signal().await;

    heartbeat.abort();
    event_pump.abort();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.shutdown_cleanup()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::warn!(error = %error, "shutdown cleanup failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "shutdown cleanup timed out"
        ),
    }

    tracing::info!("Protection engine stopped");
    Ok(())
}

/// Load configuration from `CONFIG_PATH`, the default config.yaml, or
/// built-in defaults when neither exists.
fn load_engine_config() -> anyhow::Result<Config> {
    match std::env::var("CONFIG_PATH").ok() {
        Some(path) => config::load_config(Some(&path))
            .with_context(|| format!("failed to load config from '{path}'")),
        None if std::path::Path::new("config.yaml").exists() => {
            config::load_config(None).context("failed to load config.yaml")
        }
        None => Ok(Config::default()),
    }
}

/// Log the loaded configuration.
fn log_config(config: &Config) {
    tracing::info!(
        mode = %config.engine.mode,
        instruments = config.engine.instruments.len(),
        heartbeat_secs = config.reconciliation.interval_secs,
        stop_loss_pct = %config.protection.stop_loss_pct,
        take_profit_pct = %config.protection.take_profit_pct,
        state_dir = %config.persistence.state_dir.display(),
        "Configuration loaded"
    );
}

/// Build the paper venue and seed the configured instruments.
async fn create_paper_venue(config: &Config) -> Arc<PaperVenue> {
    let venue = Arc::new(PaperVenue::new());

    if config.engine.instruments.is_empty() {
        tracing::warn!("no instruments configured, paper venue starts empty");
    }
    for instrument in &config.engine.instruments {
        tracing::info!(
            symbol = %instrument.symbol,
            initial_mark = %instrument.initial_mark,
            "seeding paper instrument"
        );
        venue
            .add_instrument(instrument.to_spec(), instrument.initial_mark)
            .await;
    }

    venue
}

/// Periodic heartbeat: reconcile, trail stops, enforce max hold.
fn spawn_heartbeat(engine: Arc<Engine>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; bootstrap just reconciled.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match engine.heartbeat().await {
                Ok(report) if report.has_critical() => {
                    tracing::warn!(report = %report, "heartbeat found critical drift");
                }
                Ok(report) if !report.is_clean() => {
                    tracing::info!(report = %report, "heartbeat repaired drift");
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(error = %error, "heartbeat failed");
                }
            }
        }
    })
}

/// Pump venue push events into the engine.
fn spawn_event_pump(engine: Arc<Engine>) -> JoinHandle<()> {
    use tokio::sync::broadcast::error::RecvError;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(error) = engine.on_event(event).await {
                        tracing::warn!(error = %error, "event handling failed");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed = missed, "event stream lagged, reconciling on next heartbeat");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("event stream closed");
                    break;
                }
            }
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is intentional because:
/// - Signal handlers are critical for graceful shutdown
/// - Failure to install handlers means the process cannot respond to termination signals
/// - It is better to fail fast during startup than to have an unresponsive process
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
