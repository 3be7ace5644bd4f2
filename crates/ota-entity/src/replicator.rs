//! The persistence seam between the entity store and durable storage.
//!
//! The store hands whole-graph snapshots to a [`StateReplicator`] and polls
//! it for replacements. [`KvReplicator`] implements the periodic
//! full-state scheme over a [`KvStore`]: one key, one JSON value, last
//! snapshot wins. A stronger backend (write-ahead log, single-writer
//! leader) substitutes here without touching the store's business logic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ota_backend::{KvError, KvStore};
use ota_types::{StorageError, StorageResult};

use crate::graph::Graph;

/// Durable home of the entity graph.
#[async_trait]
pub trait StateReplicator: Send + Sync {
    /// Persist a complete snapshot, replacing whatever was stored.
    async fn save(&self, graph: &Graph) -> StorageResult<()>;

    /// The most recently persisted snapshot, or `None` if nothing was saved.
    async fn load(&self) -> StorageResult<Option<Graph>>;

    /// Liveness of the underlying backend.
    async fn check_health(&self) -> StorageResult<()> {
        Ok(())
    }
}

pub(crate) fn backend_err(e: KvError) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Snapshot replication over a single key of a [`KvStore`].
pub struct KvReplicator {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl KvReplicator {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl StateReplicator for KvReplicator {
    async fn save(&self, graph: &Graph) -> StorageResult<()> {
        let encoded = serde_json::to_string(graph)?;
        self.kv.set(&self.key, &encoded).await.map_err(backend_err)?;
        debug!(key = %self.key, bytes = encoded.len(), "snapshot saved");
        Ok(())
    }

    async fn load(&self) -> StorageResult<Option<Graph>> {
        let Some(raw) = self.kv.get(&self.key).await.map_err(backend_err)? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn check_health(&self) -> StorageResult<()> {
        self.kv.ping().await.map_err(backend_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_backend::InMemoryKv;
    use ota_types::Account;

    fn replicator(kv: &InMemoryKv) -> KvReplicator {
        KvReplicator::new(Arc::new(kv.clone()), "state")
    }

    #[tokio::test]
    async fn load_without_snapshot_is_none() {
        let kv = InMemoryKv::new();
        assert!(replicator(&kv).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let kv = InMemoryKv::new();
        let rep = replicator(&kv);
        let mut graph = Graph::new();
        let id = graph.mint_id();
        let mut account = Account::new("a@x.io", "A");
        account.id = id.clone();
        graph.accounts.insert(id.clone(), account);

        rep.save(&graph).await.unwrap();
        assert!(kv.get("state").await.unwrap().is_some());
        assert_eq!(rep.load().await.unwrap(), Some(graph));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_serialization_error() {
        let kv = InMemoryKv::new();
        kv.set("state", "{not json").await.unwrap();
        let err = replicator(&kv).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn health_follows_backend() {
        let kv = InMemoryKv::new();
        let rep = replicator(&kv);
        rep.check_health().await.unwrap();
        kv.set_offline(true);
        assert!(matches!(
            rep.check_health().await.unwrap_err(),
            StorageError::Backend(_)
        ));
    }
}
