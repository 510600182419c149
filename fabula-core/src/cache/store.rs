//! Pluggable byte storage backing the raw-audio cache.
//!
//! The cache is storage-backend-agnostic: anything that can read, write,
//! delete and enumerate opaque byte records works — a directory of files, a
//! remote blob store, or a plain map for tests.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FabulaError, Result};

/// Key-value byte storage contract.
///
/// Implementations may block; the cache always calls them from
/// `spawn_blocking`. I/O failures surface as `FabulaError::Storage` — retry
/// decisions belong to the caller, never to the store or the cache.
pub trait ByteStore: Send + Sync {
    /// Read a record. `Ok(None)` when the key is absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a record, replacing any previous value.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Delete a record. Must succeed when the key is already absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all record keys.
    fn list(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and short-lived preview sessions.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.records.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.records.lock().keys().cloned().collect())
    }
}

/// One file per record under a root directory.
///
/// Writes go through a `.tmp` sibling and a rename, so a crash mid-write
/// never leaves a truncated record visible under its real key.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| FabulaError::Storage(format!("create {}: {e}", root.display())))?;
        debug!(root = %root.display(), "filesystem byte store opened");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are hex digests plus a short dotted suffix; anything that
        // could escape the root directory is rejected outright.
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(FabulaError::Storage(format!("invalid store key: {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

impl ByteStore for FsStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FabulaError::Storage(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let staging = self.root.join(format!("{key}.tmp"));
        fs::write(&staging, bytes)
            .map_err(|e| FabulaError::Storage(format!("write {}: {e}", staging.display())))?;
        fs::rename(&staging, &path)
            .map_err(|e| FabulaError::Storage(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FabulaError::Storage(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| FabulaError::Storage(format!("list {}: {e}", self.root.display())))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| FabulaError::Storage(format!("list entry: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Staging leftovers are not records.
            if name.ends_with(".tmp") {
                continue;
            }
            keys.push(name);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.write("abc123.wav", b"hello").unwrap();
        assert_eq!(store.read("abc123.wav").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(store.read("missing").unwrap(), None);
        store.delete("abc123.wav").unwrap();
        assert_eq!(store.read("abc123.wav").unwrap(), None);
        // deleting again must not fail
        store.delete("abc123.wav").unwrap();
    }

    #[test]
    fn fs_store_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        store.write("deadbeef.wav", &[1, 2, 3]).unwrap();
        store.write("deadbeef.meta", b"{}").unwrap();
        assert_eq!(store.read("deadbeef.wav").unwrap(), Some(vec![1, 2, 3]));

        let mut keys = store.list().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["deadbeef.meta", "deadbeef.wav"]);

        store.delete("deadbeef.wav").unwrap();
        assert_eq!(store.read("deadbeef.wav").unwrap(), None);
        store.delete("deadbeef.wav").unwrap();
    }

    #[test]
    fn fs_store_overwrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.write("key1", b"old").unwrap();
        store.write("key1", b"new").unwrap();
        assert_eq!(store.read("key1").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn fs_store_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.write("../evil", b"x").is_err());
        assert!(store.read("a/b").is_err());
        assert!(store.write("", b"x").is_err());
    }
}
