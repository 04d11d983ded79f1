//! Change watcher.
//!
//! The OS watch primitive (`notify`, debounced by `notify-debouncer-mini`)
//! feeds [`FsChange`]s into a bounded channel; [`ChangeWatcher::run`] drains
//! that channel, applies the type and echo filters and broadcasts the
//! surviving change events. Tests drive the loop by sending `FsChange`s
//! directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::dedup::DedupTable;
use crate::error::Result;
use crate::event::ChangeEvent;
use crate::hub::SubscriberHub;
use crate::store::{DocumentStore, ResourceName};

/// Default debounce window for bursts of filesystem events.
pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// Changes buffered between the OS watcher and the watch loop.
pub const CHANGE_QUEUE_CAPACITY: usize = 1024;

/// What happened to a path, as far as the watcher cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChangeKind {
    /// Created or modified; re-read the file.
    Upsert,
    /// Removed or renamed away.
    Remove,
    /// Events may have been lost; re-examine every resource under the path.
    Rescan,
}

/// A filesystem change for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: PathBuf,
    pub kind: FsChangeKind,
}

impl FsChange {
    pub fn upsert(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsChangeKind::Upsert,
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FsChangeKind::Remove,
        }
    }

    pub fn rescan(root: impl Into<PathBuf>) -> Self {
        Self {
            path: root.into(),
            kind: FsChangeKind::Rescan,
        }
    }

    /// Classify a settled path: present means upsert, absent means remove.
    ///
    /// Renames surface as one event per side, so each side lands here too.
    pub fn classify(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.exists() {
            Self::upsert(path)
        } else {
            Self::remove(path)
        }
    }
}

/// Sending half of the change channel.
pub type FsChangeSender = mpsc::Sender<FsChange>;

/// Receiving half of the change channel.
pub type FsChangeReceiver = mpsc::Receiver<FsChange>;

/// Create a change channel.
pub fn channel() -> (FsChangeSender, FsChangeReceiver) {
    mpsc::channel(CHANGE_QUEUE_CAPACITY)
}

/// Keeps the OS watch alive. Drop it to stop watching.
pub struct FsWatchGuard {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Watch `root` (non-recursively) and stream its settled changes.
///
/// A zero `debounce` falls back to [`DEFAULT_DEBOUNCE_MS`]. Watch errors are
/// logged and answered with a rescan of the whole root.
pub fn watch_directory(root: &Path, debounce: Duration) -> Result<(FsWatchGuard, FsChangeReceiver)> {
    let debounce = if debounce.is_zero() {
        Duration::from_millis(DEFAULT_DEBOUNCE_MS)
    } else {
        debounce
    };
    let (tx, rx) = channel();
    let root_owned = root.to_path_buf();

    let mut debouncer = new_debouncer(
        debounce,
        move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
            let changes: Vec<FsChange> = match result {
                Ok(events) => events
                    .into_iter()
                    // Ongoing writes are reported again once they settle.
                    .filter(|event| matches!(event.kind, DebouncedEventKind::Any))
                    .map(|event| FsChange::classify(event.path))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "filesystem watch error, rescanning");
                    vec![FsChange::rescan(&root_owned)]
                }
            };

            for change in changes {
                // Runs on the debouncer thread; a full queue applies backpressure.
                if tx.blocking_send(change).is_err() {
                    break;
                }
            }
        },
    )?;
    debouncer.watcher().watch(root, RecursiveMode::NonRecursive)?;

    info!(root = %root.display(), ?debounce, "watching directory");
    Ok((FsWatchGuard { _debouncer: debouncer }, rx))
}

/// Turns filesystem changes into broadcast change events.
pub struct ChangeWatcher {
    store: Arc<DocumentStore>,
    hub: Arc<SubscriberHub>,
    dedup: Arc<DedupTable>,
}

impl ChangeWatcher {
    pub fn new(
        store: Arc<DocumentStore>,
        hub: Arc<SubscriberHub>,
        dedup: Arc<DedupTable>,
    ) -> Self {
        Self { store, hub, dedup }
    }

    /// Run until `shutdown` fires (or its sender is dropped) or the change
    /// source closes.
    pub async fn run(self, mut changes: FsChangeReceiver, mut shutdown: broadcast::Receiver<()>) {
        info!(root = %self.store.root().display(), "change watcher started");

        loop {
            let change = tokio::select! {
                _ = shutdown.recv() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => {
                        warn!("filesystem change source closed");
                        break;
                    }
                },
            };

            for event in self.handle(change) {
                self.hub.broadcast(&event);
            }
        }

        info!("change watcher stopped");
    }

    /// Turn one change into the events to broadcast.
    pub fn handle(&self, change: FsChange) -> Vec<ChangeEvent> {
        match change.kind {
            FsChangeKind::Rescan => self.rescan(),
            kind => self.apply(&change.path, kind).into_iter().collect(),
        }
    }

    /// Re-examine every resource in the store.
    ///
    /// Unchanged resources are filtered by the dedup table, so only
    /// modifications the watcher missed are reported. Deletions that
    /// happened while events were lost are not detected.
    fn rescan(&self) -> Vec<ChangeEvent> {
        let metas = match self.store.list() {
            Ok(metas) => metas,
            Err(e) => {
                warn!(error = %e, "rescan failed to list resources");
                return Vec::new();
            }
        };

        debug!(count = metas.len(), "rescanning resources");
        metas
            .into_iter()
            .filter_map(|meta| {
                let path = self.store.root().join(meta.name.as_str());
                self.apply(&path, FsChangeKind::Upsert)
            })
            .collect()
    }

    /// Apply the type and echo filters to one change.
    ///
    /// Returns the event to broadcast, if any. The dedup table is updated
    /// here, right before the caller broadcasts.
    pub fn apply(&self, path: &Path, kind: FsChangeKind) -> Option<ChangeEvent> {
        if !self.store.contains(path) {
            return None;
        }
        let name = ResourceName::from_path(path)?;

        match kind {
            FsChangeKind::Remove => {
                self.dedup.forget(&name);
                debug!(name = %name, "resource deleted");
                Some(ChangeEvent::Deleted { name })
            }
            FsChangeKind::Upsert => {
                let (data, meta) = match self.store.read_with_meta(&name) {
                    Ok(read) => read,
                    Err(e) => {
                        // The next real mutation triggers a fresh event.
                        debug!(name = %name, error = %e, "dropping change for unreadable resource");
                        return None;
                    }
                };

                if !self.dedup.observe(&name, meta.stamp) {
                    trace!(name = %name, "suppressed echo of own write");
                    return None;
                }

                debug!(name = %name, updated_at = %meta.stamp.to_rfc3339(), "resource changed on disk");
                Some(ChangeEvent::Updated {
                    name,
                    stamp: meta.stamp,
                    data,
                })
            }
            FsChangeKind::Rescan => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Subscription;
    use serde_json::{json, Value};
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<DocumentStore>,
        hub: Arc<SubscriberHub>,
        dedup: Arc<DedupTable>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(DocumentStore::open(dir.path()).unwrap());
            Self {
                dir,
                store,
                hub: Arc::new(SubscriberHub::default()),
                dedup: Arc::new(DedupTable::new()),
            }
        }

        fn watcher(&self) -> ChangeWatcher {
            ChangeWatcher::new(self.store.clone(), self.hub.clone(), self.dedup.clone())
        }

        fn path(&self, file: &str) -> PathBuf {
            self.store.root().join(file)
        }
    }

    fn decode(message: &str) -> Value {
        serde_json::from_str(message).unwrap()
    }

    #[test]
    fn test_classify_by_existence() {
        let fx = Fixture::new();
        fs::write(fx.path("here.json"), b"{}").unwrap();

        assert_eq!(
            FsChange::classify(fx.path("here.json")),
            FsChange::upsert(fx.path("here.json"))
        );
        // A rename away or a delete leaves nothing behind.
        assert_eq!(
            FsChange::classify(fx.path("gone.json")),
            FsChange::remove(fx.path("gone.json"))
        );
    }

    #[test]
    fn test_rescan_reports_only_unseen_changes() {
        let fx = Fixture::new();
        let watcher = fx.watcher();
        let seen = ResourceName::parse("seen").unwrap();

        let meta = fx.store.write(&seen, &json!(1)).unwrap();
        fx.dedup.record(&seen, meta.stamp);
        fs::write(fx.path("missed.json"), br#"{"n": 2}"#).unwrap();
        fs::write(fx.path("notes.txt"), b"skip").unwrap();

        let events = watcher.handle(FsChange::rescan(fx.store.root()));
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChangeEvent::Updated { name, data, .. } => {
                assert_eq!(name.as_str(), "missed.json");
                assert_eq!(data, &json!({"n": 2}));
            }
            other => panic!("expected update, got {other:?}"),
        }

        // Everything is accounted for now.
        assert!(watcher.handle(FsChange::rescan(fx.store.root())).is_empty());
    }

    #[test]
    fn test_type_filter() {
        let fx = Fixture::new();
        let watcher = fx.watcher();

        fs::write(fx.path("notes.txt"), b"{}").unwrap();
        assert!(watcher.apply(&fx.path("notes.txt"), FsChangeKind::Upsert).is_none());
        assert!(watcher.apply(&fx.path(".a.json.1.0.tmp"), FsChangeKind::Upsert).is_none());
        assert!(watcher
            .apply(&fx.dir.path().join("sub").join("a.json"), FsChangeKind::Remove)
            .is_none());
        assert!(fx.dedup.is_empty());
    }

    #[test]
    fn test_external_update_emitted_once() {
        let fx = Fixture::new();
        let watcher = fx.watcher();

        fs::write(fx.path("budget.json"), br#"{"total": 7}"#).unwrap();

        match watcher.apply(&fx.path("budget.json"), FsChangeKind::Upsert) {
            Some(ChangeEvent::Updated { name, data, .. }) => {
                assert_eq!(name.as_str(), "budget.json");
                assert_eq!(data, json!({"total": 7}));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(fx.dedup.get(&ResourceName::parse("budget").unwrap()).is_some());

        // Same stamp seen again: redundant notification.
        assert!(watcher.apply(&fx.path("budget.json"), FsChangeKind::Upsert).is_none());
    }

    #[test]
    fn test_echo_of_recorded_write_suppressed() {
        let fx = Fixture::new();
        let watcher = fx.watcher();
        let name = ResourceName::parse("budget").unwrap();

        let meta = fx.store.write(&name, &json!({"total": 1})).unwrap();
        fx.dedup.record(&name, meta.stamp);

        assert!(watcher.apply(&fx.path("budget.json"), FsChangeKind::Upsert).is_none());
    }

    #[test]
    fn test_delete_clears_entry() {
        let fx = Fixture::new();
        let watcher = fx.watcher();
        let name = ResourceName::parse("gone").unwrap();

        let meta = fx.store.write(&name, &json!(1)).unwrap();
        fx.dedup.record(&name, meta.stamp);
        fs::remove_file(fx.path("gone.json")).unwrap();

        assert_eq!(
            watcher.apply(&fx.path("gone.json"), FsChangeKind::Remove),
            Some(ChangeEvent::Deleted { name: name.clone() })
        );
        assert!(fx.dedup.get(&name).is_none());
    }

    #[test]
    fn test_unreadable_change_dropped() {
        let fx = Fixture::new();
        let watcher = fx.watcher();

        fs::write(fx.path("half.json"), b"{\"tot").unwrap();
        assert!(watcher.apply(&fx.path("half.json"), FsChangeKind::Upsert).is_none());
        // Vanished between event and read.
        assert!(watcher.apply(&fx.path("never.json"), FsChangeKind::Upsert).is_none());
        assert!(fx.dedup.is_empty());
    }

    async fn next_message(sub: &mut Subscription) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("subscription closed");
        decode(&message)
    }

    #[tokio::test]
    async fn test_run_loop_broadcasts_and_stops() {
        let fx = Fixture::new();
        let mut sub = fx.hub.register();
        let (tx, rx) = channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(fx.watcher().run(rx, shutdown_rx));

        fs::write(fx.path("a.json"), b"[1]").unwrap();
        tx.try_send(FsChange::upsert(fx.path("a.json"))).unwrap();
        tx.try_send(FsChange::upsert(fx.path("a.json"))).unwrap();
        tx.try_send(FsChange::upsert(fx.path("ignored.txt"))).unwrap();

        let message = next_message(&mut sub).await;
        assert_eq!(message["type"], "updated");
        assert_eq!(message["data"], json!([1]));

        fs::remove_file(fx.path("a.json")).unwrap();
        tx.try_send(FsChange::remove(fx.path("a.json"))).unwrap();
        let message = next_message(&mut sub).await;
        assert_eq!(message, json!({"type": "deleted", "file": "a.json"}));
        assert!(sub.try_recv().is_none());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_exits_when_source_closes() {
        let fx = Fixture::new();
        let (tx, rx) = channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(fx.watcher().run(rx, shutdown_rx));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }
}
