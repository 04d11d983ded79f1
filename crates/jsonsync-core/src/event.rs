//! Change events and the messages sent on the push channel.

use serde::Serialize;
use serde_json::Value;

use crate::store::{ResourceName, Stamp};

/// A semantic change to one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// The resource was created or its content changed.
    Updated {
        name: ResourceName,
        stamp: Stamp,
        data: Value,
    },
    /// The resource file was removed.
    Deleted { name: ResourceName },
}

impl ChangeEvent {
    /// Get the name of the changed resource.
    pub fn name(&self) -> &ResourceName {
        match self {
            ChangeEvent::Updated { name, .. } | ChangeEvent::Deleted { name } => name,
        }
    }

    /// Build the push message announcing this change.
    pub fn to_message(&self) -> PushMessage<'_> {
        match self {
            ChangeEvent::Updated { name, stamp, data } => PushMessage::Updated {
                file: name.as_str(),
                updated_at: stamp.to_rfc3339(),
                data,
            },
            ChangeEvent::Deleted { name } => PushMessage::Deleted {
                file: name.as_str(),
            },
        }
    }
}

/// One resource as listed in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub updated_at: String,
    pub data: Value,
}

/// Full state of the store, sent once per new subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub files: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Serialize as a `snapshot` push message.
    pub fn encode(&self) -> serde_json::Result<String> {
        PushMessage::Snapshot(self).encode()
    }
}

/// Wire format of the push channel.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushMessage<'a> {
    Snapshot(&'a Snapshot),
    Updated {
        file: &'a str,
        updated_at: String,
        data: &'a Value,
    },
    Deleted {
        file: &'a str,
    },
}

impl PushMessage<'_> {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
