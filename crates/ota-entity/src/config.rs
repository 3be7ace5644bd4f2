use std::time::Duration;

use serde::{Deserialize, Serialize};

use ota_types::{StorageError, StorageResult};

/// Configuration for the [`EntityStore`](crate::EntityStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityStoreConfig {
    /// Key holding the serialized graph in the durable backend.
    pub snapshot_key: String,
    /// How often the background task replaces the in-memory graph with the
    /// persisted snapshot.
    pub reload_interval_ms: u64,
}

impl Default for EntityStoreConfig {
    fn default() -> Self {
        Self {
            snapshot_key: "state".into(),
            reload_interval_ms: 2_000,
        }
    }
}

impl EntityStoreConfig {
    /// Reload period, never shorter than one millisecond.
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms.max(1))
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.snapshot_key.is_empty() {
            return Err(StorageError::invalid("snapshot_key must not be empty"));
        }
        if self.reload_interval_ms == 0 {
            return Err(StorageError::invalid("reload_interval_ms must be positive"));
        }
        Ok(())
    }
}
