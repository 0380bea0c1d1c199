// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Key-value persistence for device-trust state.
//!
//! The store is deliberately small: string keys mapped to string values,
//! one file per key. The device identifier is the primary tenant, so the
//! guarantees that matter are durability of individual writes and an atomic
//! first-write (`set_if_absent`) so two racing initializations can never
//! persist two different values for the same key.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::sync::Mutex;

use super::StoragePaths;

/// Error type for storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations
    Io(io::Error),
    /// Key already holds a value (atomic first-write lost the race)
    AlreadyExists(String),
    /// Key is not usable as a file name
    InvalidKey(String),
    /// Stored value is unreadable (not valid UTF-8, truncated write)
    Corrupt(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::AlreadyExists(key) => write!(f, "Already exists: {key}"),
            StorageError::InvalidKey(key) => write!(f, "Invalid key: {key}"),
            StorageError::Corrupt(msg) => write!(f, "Corrupt value: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value persistence collaborator.
///
/// Implementations must make `set_if_absent` atomic with respect to other
/// writers of the same store: exactly one of two racing first-writes may
/// succeed, and the loser must observe the winner's value on its next `get`.
pub trait KeyValueStore: Send + Sync {
    /// Read the value for a key, `None` if absent.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any existing one.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Write a value only if the key is currently absent.
    ///
    /// Returns `StorageError::AlreadyExists` when another value is present.
    fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove the value for a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Check whether a key holds a value.
    fn contains(&self, key: &str) -> bool;
}

fn validate_key(key: &str) -> StorageResult<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// File-backed key-value store: one file per key under `<root>/kv/`.
///
/// Replacing writes go through a temp file and rename so a crash mid-write
/// never leaves a half-written value behind. `set_if_absent` opens the target
/// with `create_new`, which the filesystem resolves atomically.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    paths: StoragePaths,
}

impl FileKvStore {
    /// Open a store rooted at the given paths, creating the layout on disk.
    pub fn open(paths: StoragePaths) -> StorageResult<Self> {
        fs::create_dir_all(paths.kv_dir())?;
        Ok(Self { paths })
    }

    /// Get the storage paths.
    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        let mut file = match File::open(self.paths.key_file(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let value = String::from_utf8(raw)
            .map_err(|_| StorageError::Corrupt(format!("value for `{key}` is not UTF-8")))?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.paths.key_file(key);

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(value.as_bytes())?;
            file.flush()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.paths.key_file(key);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(value.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.paths.key_file(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &str) -> bool {
        // File::open rather than Path::exists so a permission problem reads
        // as "absent" instead of silently passing a later read that will fail.
        File::open(self.paths.key_file(key)).is_ok()
    }
}

/// In-memory key-value store for tests and embedders that manage their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        Ok(self.entries.lock().expect("kv lock poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries
            .lock()
            .expect("kv lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        if entries.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.lock().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("kv lock poisoned")
            .contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FileKvStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FileKvStore::open(StoragePaths::new(dir.path())).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_creates_kv_directory() {
        let (dir, store) = test_store();
        assert!(store.paths().kv_dir().exists());
        drop(dir);
    }

    #[test]
    fn set_and_get_round_trip() {
        let (_dir, store) = test_store();
        store.set("alpha", "value-1").unwrap();
        assert_eq!(store.get("alpha").unwrap().as_deref(), Some("value-1"));

        store.set("alpha", "value-2").unwrap();
        assert_eq!(store.get("alpha").unwrap().as_deref(), Some("value-2"));
    }

    #[test]
    fn get_absent_key_is_none() {
        let (_dir, store) = test_store();
        assert_eq!(store.get("missing").unwrap(), None);
        assert!(!store.contains("missing"));
    }

    #[test]
    fn set_if_absent_wins_only_once() {
        let (_dir, store) = test_store();
        store.set_if_absent("id", "first").unwrap();

        let err = store.set_if_absent("id", "second").unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(store.get("id").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn set_if_absent_races_resolve_to_one_value() {
        // Two handles over the same directory stand in for two concurrent
        // first-time initializations sharing one storage.
        let dir = tempfile::tempdir().expect("create temp dir");
        let a = FileKvStore::open(StoragePaths::new(dir.path())).unwrap();
        let b = FileKvStore::open(StoragePaths::new(dir.path())).unwrap();

        a.set_if_absent("id", "from-a").unwrap();
        assert!(matches!(
            b.set_if_absent("id", "from-b"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(b.get("id").unwrap().as_deref(), Some("from-a"));
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, store) = test_store();
        store.set("gone", "x").unwrap();
        store.remove("gone").unwrap();
        assert!(!store.contains("gone"));
        store.remove("gone").unwrap();
    }

    #[test]
    fn rejects_unsafe_keys() {
        let (_dir, store) = test_store();
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(
                matches!(store.get(key), Err(StorageError::InvalidKey(_))),
                "key `{key}` should be rejected"
            );
        }
    }

    #[test]
    fn memory_store_matches_file_semantics() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set_if_absent("k", "v1").unwrap();
        assert!(matches!(
            store.set_if_absent("k", "v2"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));

        store.set("k", "v3").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v3"));

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(!store.contains("k"));
    }
}
