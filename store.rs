// Store collaborators for the tree conversion
// Readers list a prefix, writers accept one key at a time

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{IoContext, JsonContext, Result};
use crate::tree::Scalar;

/// One key as it sits in the store
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub key: String,
    pub value: Scalar,
}

impl FlatRecord {
    pub fn new(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        FlatRecord {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Lists every record whose key starts with `prefix`
pub trait StoreReader {
    fn list(&self, prefix: &str) -> Result<Vec<FlatRecord>>;
}

/// Writes a single key. Each call is independent; no batching, no retry.
pub trait StoreWriter {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Anything that can be both listed and written
pub trait Store: StoreReader + StoreWriter {}

impl<T: StoreReader + StoreWriter + ?Sized> Store for T {}

/// In-process store backed by an ordered map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get(key).cloned()
    }

    /// All entries in key order
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // puts are single inserts, so a poisoned map is still consistent
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StoreReader for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<FlatRecord>> {
        let entries = self.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| FlatRecord::new(k.clone(), v.clone()))
            .collect())
    }
}

impl StoreWriter for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

impl FromIterator<(String, Vec<u8>)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        MemoryStore {
            entries: RwLock::new(iter.into_iter().collect()),
        }
    }
}

/// Entry of a `consul kv export` document
#[derive(Debug, Serialize, Deserialize)]
struct ExportEntry {
    key: String,
    #[serde(default)]
    flags: u64,
    #[serde(default)]
    value: String,
}

/// Local snapshot in the `consul kv export` format.
///
/// The file is loaded on open and only rewritten by [`FileStore::flush`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens a snapshot, starting empty when the file does not exist yet
    pub fn open(path: &Path) -> Result<Self> {
        let inner = if path.exists() {
            let raw = fs::read(path).io_context(format!("reading snapshot {}", path.display()))?;
            let exported: Vec<ExportEntry> = serde_json::from_slice(&raw)
                .json_context(format!("parsing snapshot {}", path.display()))?;

            let mut entries = BTreeMap::new();
            for entry in exported {
                let value = STANDARD
                    .decode(entry.value.as_bytes())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                    .io_context(format!("decoding value of '{}'", entry.key))?;
                entries.insert(entry.key, value);
            }
            MemoryStore {
                entries: RwLock::new(entries),
            }
        } else {
            MemoryStore::new()
        };

        debug!(path = %path.display(), keys = inner.len(), "opened snapshot");
        Ok(FileStore {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Rewrites the snapshot through a temp file and a rename
    pub fn flush(&self) -> Result<()> {
        let exported: Vec<ExportEntry> = self
            .inner
            .entries()
            .into_iter()
            .map(|(key, value)| ExportEntry {
                key,
                flags: 0,
                value: STANDARD.encode(value),
            })
            .collect();

        let body = serde_json::to_vec_pretty(&exported).json_context("encoding snapshot")?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, body).io_context(format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).io_context(format!("replacing {}", self.path.display()))?;

        debug!(path = %self.path.display(), keys = exported.len(), "flushed snapshot");
        Ok(())
    }
}

// sibling of the snapshot, never the snapshot itself
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

impl StoreReader for FileStore {
    fn list(&self, prefix: &str) -> Result<Vec<FlatRecord>> {
        self.inner.list(prefix)
    }
}

impl StoreWriter for FileStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }
}
