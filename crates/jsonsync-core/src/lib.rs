//! jsonsync core - change propagation for a directory of JSON documents.
//!
//! This crate provides:
//! - A document store mapping resource names to JSON files
//! - A change watcher that turns filesystem events into change events,
//!   suppressing echoes of the server's own writes
//! - A subscriber hub fanning events out to push connections
//! - A coordinator wiring the write and subscribe paths together

pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod event;
pub mod hub;
pub mod store;
pub mod watcher;

pub use coordinator::{SharedSyncCoordinator, SyncConfig, SyncCoordinator, WatcherTask};
pub use dedup::{DedupTable, SharedDedupTable};
pub use error::{Error, Result};
pub use event::{ChangeEvent, PushMessage, Snapshot, SnapshotEntry};
pub use hub::{SharedSubscriberHub, SubscriberHub, SubscriberId, Subscription};
pub use store::{DocumentStore, ResourceMeta, ResourceName, Stamp};
pub use watcher::{ChangeWatcher, FsChange, FsChangeKind};
