// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Path utilities for the on-device key-value storage layout.

use std::path::{Path, PathBuf};

/// Base directory for all persistent device-trust state.
/// Overridable via `DATA_DIR` (see `config`).
pub const DATA_ROOT: &str = "/var/lib/northstar-device-trust";

/// Storage path utilities for the key-value layout.
///
/// Every key is stored as a single file under `<root>/kv/`, so the layout
/// stays inspectable with plain filesystem tools.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all persistent data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory containing all key-value entries.
    pub fn kv_dir(&self) -> PathBuf {
        self.root.join("kv")
    }

    /// Path to the file backing a specific key.
    pub fn key_file(&self, key: &str) -> PathBuf {
        self.kv_dir().join(key)
    }
}
