//! Sync coordinator: startup, the write path and the subscribe path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dedup::DedupTable;
use crate::error::Result;
use crate::event::{ChangeEvent, Snapshot, SnapshotEntry};
use crate::hub::{Subscription, SubscriberHub, DEFAULT_QUEUE_CAPACITY};
use crate::store::{DocumentStore, ResourceMeta, ResourceName};
use crate::watcher::{self, ChangeWatcher, FsChangeReceiver, FsWatchGuard, DEFAULT_DEBOUNCE_MS};

/// Default time allowed for the watcher to exit on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Configuration of the sync core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the JSON documents.
    pub root: PathBuf,
    /// Window for coalescing bursts of filesystem events.
    pub debounce: Duration,
    /// Capacity of each subscriber's outbound queue.
    pub subscriber_queue: usize,
    /// How long shutdown waits for the watcher before aborting it.
    pub shutdown_grace: Duration,
}

impl SyncConfig {
    /// Create a configuration for documents under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the subscriber queue capacity.
    pub fn with_subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Wires the document store, dedup table, hub and watcher together.
pub struct SyncCoordinator {
    store: Arc<DocumentStore>,
    hub: Arc<SubscriberHub>,
    dedup: Arc<DedupTable>,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Open the store root (creating it if needed) and build fresh state.
    pub fn open(config: SyncConfig) -> Result<Self> {
        let store = DocumentStore::open(&config.root)?;
        let hub = SubscriberHub::new(config.subscriber_queue);
        Ok(Self::from_parts(
            Arc::new(store),
            Arc::new(hub),
            Arc::new(DedupTable::new()),
            config,
        ))
    }

    /// Build a coordinator around existing state.
    pub fn from_parts(
        store: Arc<DocumentStore>,
        hub: Arc<SubscriberHub>,
        dedup: Arc<DedupTable>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            hub,
            dedup,
            config,
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<SubscriberHub> {
        &self.hub
    }

    pub fn dedup(&self) -> &Arc<DedupTable> {
        &self.dedup
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start watching the store root in a background task.
    pub fn start(&self) -> Result<WatcherTask> {
        let (guard, changes) = watcher::watch_directory(self.store.root(), self.config.debounce)?;
        let mut task = self.spawn_watcher(changes);
        task.guard = Some(guard);
        Ok(task)
    }

    /// Spawn the watch loop over an arbitrary change source.
    pub fn spawn_watcher(&self, changes: FsChangeReceiver) -> WatcherTask {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let watcher = ChangeWatcher::new(self.store.clone(), self.hub.clone(), self.dedup.clone());

        let handle = tokio::spawn(watcher.run(changes, shutdown_rx));

        WatcherTask {
            handle,
            shutdown_tx,
            guard: None,
            grace: self.config.shutdown_grace,
        }
    }

    /// List resource metadata.
    pub fn list(&self) -> Result<Vec<ResourceMeta>> {
        self.store.list()
    }

    /// Read a resource.
    pub fn read(&self, name: &ResourceName) -> Result<Value> {
        self.store.read(name)
    }

    /// Persist a resource and announce it.
    ///
    /// The stamp of the write is recorded before broadcasting so the watcher
    /// recognizes the resulting filesystem event as an echo.
    pub fn write(&self, name: &ResourceName, data: Value) -> Result<ResourceMeta> {
        let meta = self.store.write(name, &data)?;
        self.dedup.record(name, meta.stamp);

        let delivered = self.hub.broadcast(&ChangeEvent::Updated {
            name: name.clone(),
            stamp: meta.stamp,
            data,
        });
        debug!(name = %name, delivered, "resource saved");

        Ok(meta)
    }

    /// Build a snapshot of every readable resource.
    ///
    /// Unreadable or corrupt resources are left out.
    pub fn snapshot(&self) -> Snapshot {
        let metas = match self.store.list() {
            Ok(metas) => metas,
            Err(e) => {
                warn!(error = %e, "failed to list resources for snapshot");
                return Snapshot::default();
            }
        };

        let files = metas
            .into_iter()
            .filter_map(|meta| match self.store.read(&meta.name) {
                Ok(data) => Some(SnapshotEntry {
                    name: meta.name.to_string(),
                    updated_at: meta.stamp.to_rfc3339(),
                    data,
                }),
                Err(e) => {
                    warn!(name = %meta.name, error = %e, "skipping resource in snapshot");
                    None
                }
            })
            .collect();

        Snapshot { files }
    }

    /// Register a new subscriber and build its snapshot.
    ///
    /// Registration comes first, so a change racing with the snapshot is
    /// still delivered as an incremental event queued behind it.
    pub fn subscribe(&self) -> (Snapshot, Subscription) {
        let subscription = self.hub.register();
        let snapshot = self.snapshot();
        debug!(
            subscriber_id = subscription.id(),
            files = snapshot.len(),
            "subscriber snapshot built"
        );
        (snapshot, subscription)
    }
}

/// Shared coordinator handle.
pub type SharedSyncCoordinator = Arc<SyncCoordinator>;

/// Handle for the background watch task.
pub struct WatcherTask {
    handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
    guard: Option<FsWatchGuard>,
    grace: Duration,
}

impl WatcherTask {
    /// Signal the watch task to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Check whether the watch task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the watch task and wait for it, aborting it once the grace
    /// period runs out.
    pub async fn shutdown(self) {
        self.stop();
        drop(self.guard);

        let mut handle = self.handle;
        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => info!("change watcher shut down"),
            Ok(Err(e)) => warn!(error = %e, "change watcher task panicked"),
            Err(_) => {
                warn!(grace = ?self.grace, "change watcher did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}
