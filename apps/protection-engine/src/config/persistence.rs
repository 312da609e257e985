//! Persistence configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Persistence configuration for position records and danger markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding record files, the archive, and the danger
    /// marker file. Created on startup if absent.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
