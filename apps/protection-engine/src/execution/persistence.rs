//! Durable position state.
//!
//! One JSON document per open position plus a single danger-marker map,
//! written with a temp-file-and-rename so a crash mid-write can never
//! leave a half-written record. Closed positions move to an archive
//! directory rather than being deleted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::{ClosedRecord, DangerEntry, PositionRecord};

/// Failures reading or writing the state directory.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem operation failed.
    #[error("state io failure on {path}: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// A state file exists but does not parse.
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        /// Path of the unparseable file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File-backed store for position records, the exit archive, and the
/// danger-marker map.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) a state directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        for dir in [root.clone(), root.join("positions"), root.join("archive")] {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, symbol: &str) -> PathBuf {
        self.root
            .join("positions")
            .join(format!("{}.json", sanitize(symbol)))
    }

    fn danger_path(&self) -> PathBuf {
        self.root.join("danger.json")
    }

    /// Persist a record, replacing any previous version.
    pub fn save_record(&self, record: &PositionRecord) -> Result<(), PersistenceError> {
        let path = self.record_path(&record.symbol);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| PersistenceError::Corrupt {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &bytes)
    }

    /// Load the record for one symbol, if present.
    pub fn load_record(&self, symbol: &str) -> Result<Option<PositionRecord>, PersistenceError> {
        let path = self.record_path(symbol);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PersistenceError::Corrupt { path, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Load every record in the store. Unparseable files are skipped with
    /// a warning so one corrupt record cannot block startup; the position
    /// it described will be re-adopted from live venue state.
    pub fn load_all_records(&self) -> Result<Vec<PositionRecord>, PersistenceError> {
        let dir = self.root.join("positions");
        let mut records = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
            match serde_json::from_slice::<PositionRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping corrupt position record");
                }
            }
        }
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(records)
    }

    /// Delete the record for a symbol. Missing files are fine.
    pub fn remove_record(&self, symbol: &str) -> Result<(), PersistenceError> {
        let path = self.record_path(symbol);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Move a closed position into the archive and drop its live record.
    pub fn archive(&self, closed: &ClosedRecord) -> Result<(), PersistenceError> {
        let name = format!(
            "{}-{}.json",
            sanitize(&closed.record.symbol),
            closed.closed_at.timestamp_millis()
        );
        let path = self.root.join("archive").join(name);
        let bytes = serde_json::to_vec_pretty(closed).map_err(|e| PersistenceError::Corrupt {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &bytes)?;
        self.remove_record(&closed.record.symbol)
    }

    /// Load the danger-marker map. Absent file means no markers.
    pub fn load_danger(&self) -> Result<HashMap<String, DangerEntry>, PersistenceError> {
        let path = self.danger_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| PersistenceError::Corrupt { path, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Persist the danger-marker map, replacing the previous one.
    pub fn save_danger(
        &self,
        markers: &HashMap<String, DangerEntry>,
    ) -> Result<(), PersistenceError> {
        let path = self.danger_path();
        let bytes = serde_json::to_vec_pretty(markers).map_err(|e| PersistenceError::Corrupt {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &bytes)
    }
}

/// Write via a sibling temp file and rename over the target, so readers
/// only ever see a complete document.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

fn sanitize(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_record(symbol: &str) -> PositionRecord {
        PositionRecord::new(symbol, Direction::Long, dec!(2), dec!(100))
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let record = make_record("BTC-USDT-SWAP");
        store.save_record(&record).unwrap();

        let loaded = store.load_record("BTC-USDT-SWAP").unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTC-USDT-SWAP");
        assert_eq!(loaded.size, dec!(2));
        assert_eq!(loaded.entry_price, dec!(100));
    }

    #[test]
    fn test_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert!(store.load_record("ETH-USDT-SWAP").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.save_record(&make_record("BTC-USDT-SWAP")).unwrap();
        let mut updated = make_record("BTC-USDT-SWAP");
        updated.size = dec!(1.5);
        store.save_record(&updated).unwrap();

        let loaded = store.load_record("BTC-USDT-SWAP").unwrap().unwrap();
        assert_eq!(loaded.size, dec!(1.5));

        assert_eq!(store.load_all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_archive_removes_live_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let record = make_record("BTC-USDT-SWAP");
        store.save_record(&record).unwrap();
        store
            .archive(&ClosedRecord {
                record,
                exit_reason: ExitReason::StopLoss,
                closed_at: Utc::now(),
            })
            .unwrap();

        assert!(store.load_record("BTC-USDT-SWAP").unwrap().is_none());
        let archived = fs::read_dir(dir.path().join("archive")).unwrap().count();
        assert_eq!(archived, 1);
    }

    #[test]
    fn test_corrupt_record_skipped_on_bulk_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.save_record(&make_record("BTC-USDT-SWAP")).unwrap();
        fs::write(dir.path().join("positions/BAD.json"), b"{not json").unwrap();

        let records = store.load_all_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "BTC-USDT-SWAP");
    }

    #[test]
    fn test_danger_map_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        assert!(store.load_danger().unwrap().is_empty());

        let mut markers = HashMap::new();
        markers.insert(
            "BTC-USDT-SWAP".to_string(),
            DangerEntry {
                symbol: "BTC-USDT-SWAP".to_string(),
                reason: "emergency close exhausted".to_string(),
                live_size: dec!(2),
                recorded_at: Utc::now(),
            },
        );
        store.save_danger(&markers).unwrap();

        let loaded = store.load_danger().unwrap();
        assert!(loaded.contains_key("BTC-USDT-SWAP"));
    }

    #[test]
    fn test_symbol_sanitized_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.save_record(&make_record("BTC/USDT")).unwrap();
        assert!(dir.path().join("positions/BTC_USDT.json").exists());
        assert!(store.load_record("BTC/USDT").unwrap().is_some());
    }
}
