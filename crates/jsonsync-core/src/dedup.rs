//! Last-notified stamps per resource.
//!
//! The table correlates each resource with the stamp of the last `updated`
//! broadcast sent for it. The write path records the stamp of its own write
//! before broadcasting, so when the watcher later sees the filesystem event
//! for that same write it finds an equal stamp and stays quiet.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::{ResourceName, Stamp};

/// Mapping from resource name to last-broadcast stamp.
#[derive(Debug, Default)]
pub struct DedupTable {
    entries: Mutex<HashMap<ResourceName, Stamp>>,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stamp` as the last one broadcast for `name`.
    pub fn record(&self, name: &ResourceName, stamp: Stamp) {
        self.entries.lock().insert(name.clone(), stamp);
    }

    /// Check a stamp observed on disk.
    ///
    /// Returns `false` when it equals the recorded stamp (an echo). Otherwise
    /// records it and returns `true`; the caller must then broadcast.
    pub fn observe(&self, name: &ResourceName, stamp: Stamp) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(name) == Some(&stamp) {
            return false;
        }
        entries.insert(name.clone(), stamp);
        true
    }

    /// Drop the entry of a deleted resource.
    pub fn forget(&self, name: &ResourceName) -> Option<Stamp> {
        self.entries.lock().remove(name)
    }

    pub fn get(&self, name: &ResourceName) -> Option<Stamp> {
        self.entries.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Shared dedup table handle.
pub type SharedDedupTable = Arc<DedupTable>;
