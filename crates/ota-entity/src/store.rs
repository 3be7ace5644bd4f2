use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ota_backend::{BlobStore, KvStore};
use ota_types::{StorageError, StorageResult};

use crate::config::EntityStoreConfig;
use crate::graph::{Graph, GraphSummary};
use crate::integrity::IntegrityReport;
use crate::replicator::{KvReplicator, StateReplicator};

enum WriterCommand {
    Save(Box<Graph>),
    Flush(oneshot::Sender<()>),
}

/// Owner of the canonical entity graph.
///
/// Every operation works against the in-memory [`Graph`] and returns
/// independent copies, never references into it. Each mutation queues a
/// full snapshot for the background writer (fire-and-forget from the
/// caller's view); snapshots reach the replicator in mutation order.
///
/// A separate poll ([`reload`](Self::reload), or the periodic task started
/// by [`start_reload`](Self::start_reload)) replaces the whole graph with
/// the persisted snapshot. Polls and writes are not coordinated: a reload
/// that lands before a queued write reaches the backend discards that
/// write locally, and concurrent instances overwrite each other's
/// snapshots. Last snapshot wins.
pub struct EntityStore {
    graph: RwLock<Graph>,
    replicator: Arc<dyn StateReplicator>,
    pub(crate) blob_store: Arc<dyn BlobStore>,
    writer: mpsc::UnboundedSender<WriterCommand>,
    reload_task: Mutex<Option<JoinHandle<()>>>,
    config: EntityStoreConfig,
}

impl EntityStore {
    /// Create an empty store and start its snapshot writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: EntityStoreConfig,
        replicator: Arc<dyn StateReplicator>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&replicator), rx));
        Self {
            graph: RwLock::new(Graph::new()),
            replicator,
            blob_store,
            writer: tx,
            reload_task: Mutex::new(None),
            config,
        }
    }

    /// Create a store, load the persisted snapshot, and start the periodic
    /// reload task.
    pub async fn open(
        config: EntityStoreConfig,
        replicator: Arc<dyn StateReplicator>,
        blob_store: Arc<dyn BlobStore>,
    ) -> StorageResult<Arc<Self>> {
        config.validate()?;
        let store = Arc::new(Self::new(config, replicator, blob_store));
        store.reload().await?;
        store.start_reload();
        info!(
            interval_ms = store.config.reload_interval_ms,
            "entity store opened"
        );
        Ok(store)
    }

    /// [`open`](Self::open) with a [`KvReplicator`] on `config.snapshot_key`.
    pub async fn open_on_kv(
        config: EntityStoreConfig,
        kv: Arc<dyn KvStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> StorageResult<Arc<Self>> {
        let replicator = Arc::new(KvReplicator::new(kv, config.snapshot_key.clone()));
        Self::open(config, replicator, blob_store).await
    }

    pub fn config(&self) -> &EntityStoreConfig {
        &self.config
    }

    /// Start (or restart) the periodic snapshot reload.
    ///
    /// The task holds only a weak reference and stops once the store is
    /// dropped.
    pub fn start_reload(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let every = self.config.reload_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; `open` already loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = store.reload().await {
                    warn!(error = %e, "snapshot reload failed");
                }
            }
        });
        if let Ok(mut slot) = self.reload_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the periodic reload, if running.
    pub fn stop_reload(&self) {
        if let Ok(mut slot) = self.reload_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Replace the in-memory graph with the persisted snapshot.
    ///
    /// Returns `false` when no snapshot exists; the graph is left as is.
    pub async fn reload(&self) -> StorageResult<bool> {
        let Some(snapshot) = self.replicator.load().await? else {
            return Ok(false);
        };
        let summary = snapshot.summary();
        *self.write_graph()? = snapshot;
        debug!(
            accounts = summary.accounts,
            apps = summary.apps,
            deployments = summary.deployments,
            "graph reloaded from snapshot"
        );
        Ok(true)
    }

    /// Write the current graph to the replicator and wait for it.
    pub async fn persist_now(&self) -> StorageResult<()> {
        let graph = self.snapshot()?;
        self.replicator.save(&graph).await
    }

    /// Wait until every snapshot queued so far has been handed to the
    /// replicator.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(WriterCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Liveness of the snapshot backend.
    pub async fn check_health(&self) -> StorageResult<()> {
        self.replicator.check_health().await
    }

    /// Independent copy of the whole graph.
    pub fn snapshot(&self) -> StorageResult<Graph> {
        Ok(self.read_graph()?.clone())
    }

    pub fn summary(&self) -> StorageResult<GraphSummary> {
        Ok(self.read_graph()?.summary())
    }

    /// Cross-check every index against the primary records.
    pub fn verify(&self) -> StorageResult<IntegrityReport> {
        Ok(self.read_graph()?.verify())
    }

    pub(crate) fn read_graph(&self) -> StorageResult<RwLockReadGuard<'_, Graph>> {
        self.graph
            .read()
            .map_err(|e| StorageError::Backend(format!("entity graph lock poisoned: {e}")))
    }

    pub(crate) fn write_graph(&self) -> StorageResult<RwLockWriteGuard<'_, Graph>> {
        self.graph
            .write()
            .map_err(|e| StorageError::Backend(format!("entity graph lock poisoned: {e}")))
    }

    /// Queue a snapshot of `graph` for the background writer.
    pub(crate) fn schedule_save(&self, graph: &Graph) {
        if self
            .writer
            .send(WriterCommand::Save(Box::new(graph.clone())))
            .is_err()
        {
            warn!("snapshot writer stopped; mutation not persisted");
        }
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        self.stop_reload();
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let summary = self.summary().unwrap_or_default();
        f.debug_struct("EntityStore")
            .field("config", &self.config)
            .field("summary", &summary)
            .finish()
    }
}

async fn run_writer(
    replicator: Arc<dyn StateReplicator>,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Save(graph) => {
                if let Err(e) = replicator.save(&graph).await {
                    warn!(error = %e, "snapshot write failed");
                }
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("snapshot writer stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use ota_backend::{InMemoryBlobStore, InMemoryKv};
    use ota_types::{Account, EntityId};

    use super::EntityStore;
    use crate::config::EntityStoreConfig;
    use crate::replicator::KvReplicator;

    pub(crate) struct Fixture {
        pub store: EntityStore,
        pub kv: InMemoryKv,
        pub blobs: Arc<InMemoryBlobStore>,
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_on(InMemoryKv::new())
    }

    pub(crate) fn fixture_on(kv: InMemoryKv) -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new("https://blobs.test"));
        let replicator = Arc::new(KvReplicator::new(Arc::new(kv.clone()), "state"));
        let store = EntityStore::new(EntityStoreConfig::default(), replicator, blobs.clone());
        Fixture { store, kv, blobs }
    }

    pub(crate) async fn account(store: &EntityStore, email: &str) -> EntityId {
        store
            .add_account(Account::new(email, email.split('@').next().unwrap_or(email)))
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::*;
    use super::*;
    use ota_backend::{InMemoryBlobStore, InMemoryKv};

    #[tokio::test]
    async fn mutation_snapshot_reaches_backend() {
        let f = fixture();
        let id = account(&f.store, "a@x.io").await;
        f.store.flush().await;

        let raw = f.kv.get("state").await.unwrap().expect("snapshot written");
        let graph: Graph = serde_json::from_str(&raw).unwrap();
        assert!(graph.accounts.contains_key(&id));
        assert_eq!(graph.next_id_number, 1);
    }

    #[tokio::test]
    async fn failed_snapshot_write_does_not_fail_mutation() {
        let f = fixture();
        f.kv.set_offline(true);
        account(&f.store, "a@x.io").await;
        f.store.flush().await;
        f.kv.set_offline(false);
        assert!(f.kv.get("state").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reload_without_snapshot_keeps_graph() {
        let f = fixture();
        account(&f.store, "a@x.io").await;
        assert!(!f.store.reload().await.unwrap());
        assert_eq!(f.store.summary().unwrap().accounts, 1);
    }

    #[tokio::test]
    async fn instances_converge_through_snapshots() {
        let kv = InMemoryKv::new();
        let a = fixture_on(kv.clone());
        let b = fixture_on(kv.clone());

        let id = account(&a.store, "a@x.io").await;
        a.store.flush().await;

        assert!(b.store.reload().await.unwrap());
        assert_eq!(b.store.get_account(&id).await.unwrap().email, "a@x.io");
    }

    #[tokio::test]
    async fn last_snapshot_wins() {
        let kv = InMemoryKv::new();
        let a = fixture_on(kv.clone());
        let b = fixture_on(kv.clone());

        account(&a.store, "a@x.io").await;
        a.store.flush().await;
        account(&b.store, "b@x.io").await;
        b.store.flush().await;

        // A reloads B's snapshot, which never saw A's account.
        a.store.reload().await.unwrap();
        assert!(a.store.get_account_by_email("a@x.io").await.is_err());
        assert!(a.store.get_account_by_email("b@x.io").await.is_ok());
    }

    #[tokio::test]
    async fn persist_now_writes_synchronously() {
        let f = fixture();
        {
            let mut graph = f.store.write_graph().unwrap();
            graph.blobs.insert("b1".into(), "https://blobs.test/b1".into());
        }
        f.store.persist_now().await.unwrap();
        let raw = f.kv.get("state").await.unwrap().unwrap();
        assert!(raw.contains("https://blobs.test/b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_reload_picks_up_foreign_snapshot() {
        let kv = InMemoryKv::new();
        let store = EntityStore::open_on_kv(
            EntityStoreConfig::default(),
            Arc::new(kv.clone()),
            Arc::new(InMemoryBlobStore::default()),
        )
        .await
        .unwrap();

        let other = fixture_on(kv.clone());
        account(&other.store, "remote@x.io").await;
        other.store.flush().await;

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert!(store.get_account_by_email("remote@x.io").await.is_ok());
        store.stop_reload();
    }

    #[tokio::test]
    async fn open_rejects_zero_reload_interval() {
        let config = EntityStoreConfig {
            reload_interval_ms: 0,
            ..Default::default()
        };
        let err = EntityStore::open_on_kv(
            config,
            Arc::new(InMemoryKv::new()),
            Arc::new(InMemoryBlobStore::default()),
        )
        .await
        .err()
        .expect("zero interval rejected");
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_task_survives_zero_interval_on_unvalidated_store() {
        let config = EntityStoreConfig {
            reload_interval_ms: 0,
            ..Default::default()
        };
        let f = fixture();
        let store = Arc::new(EntityStore::new(
            config,
            Arc::new(KvReplicator::new(Arc::new(f.kv.clone()), "state")),
            f.blobs.clone(),
        ));
        store.start_reload();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let finished = store
            .reload_task
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.is_finished());
        assert_eq!(finished, Some(false));
        store.stop_reload();
    }

    #[tokio::test]
    async fn health_reflects_snapshot_backend() {
        let f = fixture();
        f.store.check_health().await.unwrap();
        f.kv.set_offline(true);
        assert!(f.store.check_health().await.is_err());
    }

    #[tokio::test]
    async fn snapshot_is_an_independent_copy() {
        let f = fixture();
        account(&f.store, "a@x.io").await;
        let mut copy = f.store.snapshot().unwrap();
        copy.accounts.clear();
        assert_eq!(f.store.summary().unwrap().accounts, 1);
    }
}
