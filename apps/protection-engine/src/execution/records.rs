//! Authoritative in-process record state.
//!
//! [`RecordStore`] owns the per-symbol position records, the danger
//! markers, and the post-exit cooldown clock. Every mutation writes
//! through to the [`StateStore`] on disk before returning, so a restart
//! reloads exactly what the last completed operation left behind.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{ClosedRecord, DangerEntry, ExitReason, PositionRecord};

use super::persistence::{PersistenceError, StateStore};

/// Position records, danger markers, and cooldowns, with write-through
/// persistence.
pub struct RecordStore {
    store: StateStore,
    records: RwLock<HashMap<String, PositionRecord>>,
    danger: RwLock<HashMap<String, DangerEntry>>,
    cooldown_until: RwLock<HashMap<String, DateTime<Utc>>>,
    disconnected: AtomicBool,
}

impl RecordStore {
    /// Open the store, loading any records and danger markers left by a
    /// previous run.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let store = StateStore::open(state_dir.as_ref())?;
        let records: HashMap<String, PositionRecord> = store
            .load_all_records()?
            .into_iter()
            .map(|r| (r.symbol.clone(), r))
            .collect();
        let danger = store.load_danger()?;

        if !records.is_empty() {
            info!(count = records.len(), "loaded position records from disk");
        }
        if !danger.is_empty() {
            warn!(
                symbols = ?danger.keys().collect::<Vec<_>>(),
                "danger markers present from previous run"
            );
        }

        Ok(Self {
            store,
            records: RwLock::new(records),
            danger: RwLock::new(danger),
            cooldown_until: RwLock::new(HashMap::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    // ============================================
    // Position records
    // ============================================

    /// Snapshot of one symbol's record.
    pub async fn get(&self, symbol: &str) -> Option<PositionRecord> {
        self.records.read().await.get(symbol).cloned()
    }

    /// Snapshot of every tracked record.
    pub async fn all(&self) -> Vec<PositionRecord> {
        let mut records: Vec<PositionRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        records
    }

    /// Symbols with a tracked record.
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.records.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Insert or replace a record, persisting it before returning.
    pub async fn upsert(&self, record: PositionRecord) -> Result<(), PersistenceError> {
        self.store.save_record(&record)?;
        self.records
            .write()
            .await
            .insert(record.symbol.clone(), record);
        Ok(())
    }

    /// Retire a record into the archive with the given exit reason.
    /// Returns the archived document, or `None` when nothing was tracked.
    pub async fn archive(
        &self,
        symbol: &str,
        exit_reason: ExitReason,
    ) -> Result<Option<ClosedRecord>, PersistenceError> {
        let removed = self.records.write().await.remove(symbol);
        let Some(record) = removed else {
            return Ok(None);
        };
        let closed = ClosedRecord {
            record,
            exit_reason,
            closed_at: Utc::now(),
        };
        self.store.archive(&closed)?;
        Ok(Some(closed))
    }

    // ============================================
    // Danger markers
    // ============================================

    /// Persist a danger marker for a symbol.
    pub async fn mark_danger(&self, entry: DangerEntry) -> Result<(), PersistenceError> {
        let mut danger = self.danger.write().await;
        warn!(symbol = %entry.symbol, reason = %entry.reason, "marking symbol as danger");
        danger.insert(entry.symbol.clone(), entry);
        self.store.save_danger(&danger)
    }

    /// Remove a symbol's danger marker, if present.
    pub async fn clear_danger(&self, symbol: &str) -> Result<(), PersistenceError> {
        let mut danger = self.danger.write().await;
        if danger.remove(symbol).is_some() {
            info!(symbol = symbol, "danger marker cleared");
            self.store.save_danger(&danger)?;
        }
        Ok(())
    }

    /// Whether a symbol carries a danger marker.
    pub async fn is_danger(&self, symbol: &str) -> bool {
        self.danger.read().await.contains_key(symbol)
    }

    /// Symbols currently marked as danger.
    pub async fn danger_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.danger.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    // ============================================
    // Cooldowns
    // ============================================

    /// Start (or extend) a post-exit cooldown for a symbol.
    pub async fn start_cooldown(&self, symbol: &str, until: DateTime<Utc>) {
        self.cooldown_until
            .write()
            .await
            .insert(symbol.to_string(), until);
    }

    /// Time left on a symbol's cooldown, or `None` when it is clear.
    pub async fn cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let until = *self.cooldown_until.read().await.get(symbol)?;
        let remaining = until.signed_duration_since(now);
        if remaining > Duration::zero() {
            Some(remaining)
        } else {
            None
        }
    }

    // ============================================
    // Connectivity
    // ============================================

    /// Flag the push-event stream as down or restored.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Whether the push-event stream is currently down.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}
