//! Per-symbol operation serialization.
//!
//! Order placement, reconciliation, trailing updates, and emergency closes
//! for one symbol must never interleave. Each symbol gets its own async
//! mutex; operations on different symbols proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily-created per-symbol async locks.
#[derive(Default)]
pub struct SymbolLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    /// New empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a symbol, waiting if another operation on the
    /// same symbol is in flight. The guard is owned so it can be held
    /// across await points.
    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(symbol.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}
