//! On-disk JSON document store.
//!
//! Every resource is a single `<name>.json` file directly inside the store
//! root. The file is the only source of truth: metadata is recomputed from
//! `stat` on every call and nothing else is persisted.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Extension carried by every resource file.
pub const EXTENSION: &str = "json";

const SUFFIX: &str = ".json";

/// Distinguishes temp files of concurrent writes within this process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A filename-safe resource name, always carrying the `.json` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(String);

impl ResourceName {
    /// Sanitize a client-supplied name.
    ///
    /// The `.json` suffix is appended when missing, so `budget` and
    /// `budget.json` name the same resource. Names that could address a file
    /// outside the store root (path separators, `.`, `..`) are rejected, as are
    /// hidden names, which the store reserves for its temp files.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.starts_with('.') || raw.contains(['/', '\\', '\0']) {
            return Err(Error::InvalidName(raw.to_string()));
        }

        if raw.ends_with(SUFFIX) {
            Ok(Self(raw.to_string()))
        } else {
            Ok(Self(format!("{raw}{SUFFIX}")))
        }
    }

    /// Name of the resource stored at `path`, if the file looks like one.
    ///
    /// Only the exact `.json` suffix matches, the same one [`parse`](Self::parse)
    /// appends, so every listed name can be requested back. Hidden files never
    /// match.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') || Path::new(file_name).extension()?.to_str()? != EXTENSION {
            return None;
        }
        Some(Self(file_name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Modification marker of a resource file.
///
/// Two stamps compare equal when the filesystem reports the same
/// modification time, at whatever granularity it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp(SystemTime);

impl Stamp {
    pub fn new(modified: SystemTime) -> Self {
        Self(modified)
    }

    pub fn modified(&self) -> SystemTime {
        self.0
    }

    /// ISO-8601 UTC timestamp with second precision and a `Z` suffix.
    pub fn to_rfc3339(&self) -> String {
        DateTime::<Utc>::from(self.0).to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Metadata of a stored resource, derived from `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    pub name: ResourceName,
    pub size: u64,
    pub stamp: Stamp,
}

impl ResourceMeta {
    fn from_metadata(name: ResourceName, metadata: &fs::Metadata) -> io::Result<Self> {
        Ok(Self {
            name,
            size: metadata.len(),
            stamp: Stamp::new(metadata.modified()?),
        })
    }
}

/// JSON documents kept as files in a single directory.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store, creating the root directory and canonicalizing its path.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` sits directly inside the store root.
    pub fn contains(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
    }

    /// Resolve a resource name to its file path.
    ///
    /// An existing file is resolved through symlinks and must still live
    /// directly inside the root.
    pub fn path_of(&self, name: &ResourceName) -> Result<PathBuf> {
        let path = self.root.join(name.as_str());
        if let Ok(resolved) = path.canonicalize() {
            let root = self.root.canonicalize()?;
            if resolved.parent() != Some(root.as_path()) {
                return Err(Error::InvalidName(name.to_string()));
            }
        }
        Ok(path)
    }

    /// Parse a client-supplied name and check it stays inside the root.
    pub fn resolve(&self, raw: &str) -> Result<ResourceName> {
        let name = ResourceName::parse(raw)?;
        self.path_of(&name)?;
        Ok(name)
    }

    /// List all resources sorted by name.
    ///
    /// Returns an empty list when the root does not exist.
    pub fn list(&self) -> Result<Vec<ResourceMeta>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = ResourceName::from_path(&path) else {
                continue;
            };
            // Entries removed since read_dir are skipped, not reported.
            let metadata = match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!(name = %name, error = %e, "skipping vanished entry");
                    continue;
                }
            };
            items.push(ResourceMeta::from_metadata(name, &metadata)?);
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    /// Get the current metadata of a resource.
    pub fn stat(&self, name: &ResourceName) -> Result<ResourceMeta> {
        let path = self.path_of(name)?;
        let metadata = fs::metadata(&path).map_err(|e| not_found_or_io(e, name))?;
        Ok(ResourceMeta::from_metadata(name.clone(), &metadata)?)
    }

    /// Read and parse a resource.
    pub fn read(&self, name: &ResourceName) -> Result<Value> {
        let (bytes, _) = self.load(name)?;
        decode(name, &bytes)
    }

    /// Read a resource together with its metadata.
    ///
    /// Both come from the same open file, so a concurrent replacement cannot
    /// pair old content with a newer stamp.
    pub fn read_with_meta(&self, name: &ResourceName) -> Result<(Value, ResourceMeta)> {
        let (bytes, metadata) = self.load(name)?;
        let value = decode(name, &bytes)?;
        Ok((value, ResourceMeta::from_metadata(name.clone(), &metadata)?))
    }

    fn load(&self, name: &ResourceName) -> Result<(Vec<u8>, fs::Metadata)> {
        let path = self.path_of(name)?;
        let mut file = fs::File::open(&path).map_err(|e| not_found_or_io(e, name))?;
        // Stat before reading: an in-place write racing the read leaves an
        // older stamp, which the next event then corrects.
        let metadata = file.metadata()?;
        let mut bytes = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut bytes)?;
        Ok((bytes, metadata))
    }

    /// Persist a resource, replacing any previous content.
    ///
    /// The document is written pretty-printed to a hidden sibling and renamed
    /// over the target, so readers see either the old or the new file.
    /// Returns the metadata of the file just written.
    pub fn write(&self, name: &ResourceName, value: &Value) -> Result<ResourceMeta> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_of(name)?;

        let mut bytes = serde_json::to_vec_pretty(value).map_err(io::Error::from)?;
        bytes.push(b'\n');

        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{}.{}.{}.tmp", name, std::process::id(), seq));

        // The stamp is taken from the temp file; rename keeps the mtime, and
        // a later stat could see someone else's replacement.
        let written = write_file(&tmp, &bytes).and_then(|metadata| {
            fs::rename(&tmp, &path)?;
            Ok(metadata)
        });
        let metadata = match written {
            Ok(metadata) => metadata,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };

        debug!(name = %name, bytes = bytes.len(), "resource written");
        Ok(ResourceMeta::from_metadata(name.clone(), &metadata)?)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<fs::Metadata> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.metadata()
}

fn decode(name: &ResourceName, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|source| Error::Corrupt {
        name: name.to_string(),
        source,
    })
}

fn not_found_or_io(error: io::Error, name: &ResourceName) -> Error {
    if error.kind() == io::ErrorKind::NotFound {
        Error::NotFound(name.to_string())
    } else {
        Error::Io(error)
    }
}
