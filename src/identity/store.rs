// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Per-installation device identifier: minting and durable storage.
//!
//! Exactly one identifier exists per installation for the lifetime of the
//! storage. It is created lazily on first access and replaced only by an
//! explicit `regenerate` (manual device reset) or removed by `clear`. There
//! is no fallback identifier: storage and random-source failures are fatal
//! to the calling operation.

use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{KeyValueStore, StorageError};

/// Fixed storage key holding the device identifier.
pub const DEVICE_IDENTIFIER_KEY: &str = "device_identifier";

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identifier storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("random source failed while minting identifier")]
    GenerationFailed,
}

/// Opaque 128-bit per-installation identifier, rendered as a canonical
/// lowercase hyphenated UUID-v4 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(Uuid);

impl DeviceIdentifier {
    /// Parse a stored identifier string.
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Uuid renders lowercase hyphenated 8-4-4-4-12 by default.
        self.0.fmt(f)
    }
}

/// Mint a fresh identifier from 16 cryptographically random bytes.
///
/// `Builder::from_random_bytes` stamps the RFC 4122 layout: version nibble
/// `4` in byte 6, variant bits `10` in byte 8.
fn mint(rng: &SystemRandom) -> Result<DeviceIdentifier, IdentityError> {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes)
        .map_err(|_| IdentityError::GenerationFailed)?;
    Ok(DeviceIdentifier(
        uuid::Builder::from_random_bytes(bytes).into_uuid(),
    ))
}

/// Durable store for the per-installation device identifier.
pub struct DeviceIdStore {
    store: Arc<dyn KeyValueStore>,
    rng: SystemRandom,
}

impl DeviceIdStore {
    /// Create a store over the given key-value persistence.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            rng: SystemRandom::new(),
        }
    }

    /// Return the persisted identifier, minting and persisting one first if
    /// none exists. Idempotent: repeated calls return the same value until
    /// `regenerate` or `clear`.
    ///
    /// Concurrent first-time calls resolve through the storage layer's
    /// atomic first-write: the loser re-reads the winner's value.
    pub fn get_or_create(&self) -> Result<DeviceIdentifier, IdentityError> {
        loop {
            if let Some(raw) = self.store.get(DEVICE_IDENTIFIER_KEY)? {
                return DeviceIdentifier::parse(raw.trim()).map_err(|_| {
                    IdentityError::Storage(StorageError::Corrupt(format!(
                        "stored device identifier is not a UUID: `{raw}`"
                    )))
                });
            }

            let fresh = mint(&self.rng)?;
            match self
                .store
                .set_if_absent(DEVICE_IDENTIFIER_KEY, &fresh.to_string())
            {
                Ok(()) => return Ok(fresh),
                // Lost the first-write race; loop re-reads the winner.
                Err(StorageError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Unconditionally mint a new identifier and overwrite the stored value.
    ///
    /// Any server-side authorization bound to the previous identifier becomes
    /// orphaned; this is the manual device-reset operation.
    pub fn regenerate(&self) -> Result<DeviceIdentifier, IdentityError> {
        let fresh = mint(&self.rng)?;
        self.store.set(DEVICE_IDENTIFIER_KEY, &fresh.to_string())?;
        Ok(fresh)
    }

    /// Remove the stored identifier. The next `get_or_create` mints a fresh
    /// one.
    pub fn clear(&self) -> Result<(), IdentityError> {
        self.store.remove(DEVICE_IDENTIFIER_KEY)?;
        Ok(())
    }

    /// Check whether an identifier is currently stored.
    pub fn exists(&self) -> bool {
        self.store.contains(DEVICE_IDENTIFIER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileKvStore, MemoryKvStore, StoragePaths};

    fn memory_store() -> DeviceIdStore {
        DeviceIdStore::new(Arc::new(MemoryKvStore::new()))
    }

    fn assert_uuid_v4_shape(rendered: &str) {
        assert_eq!(rendered.len(), 36);
        let chars: Vec<char> = rendered.chars().collect();
        for idx in [8, 13, 18, 23] {
            assert_eq!(chars[idx], '-', "hyphen expected at {idx} in {rendered}");
        }
        assert_eq!(chars[14], '4', "version nibble must be 4: {rendered}");
        assert!(
            matches!(chars[19], '8' | '9' | 'a' | 'b'),
            "variant nibble must be 8/9/a/b: {rendered}"
        );
        assert!(
            rendered
                .chars()
                .all(|c| c == '-' || c.is_ascii_hexdigit() && !c.is_ascii_uppercase()),
            "must be lowercase hex: {rendered}"
        );
    }

    #[test]
    fn first_access_mints_and_persists_a_uuid_v4() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let kv = Arc::new(FileKvStore::open(StoragePaths::new(dir.path())).unwrap());
        let ids = DeviceIdStore::new(kv.clone());

        assert!(!ids.exists());
        let first = ids.get_or_create().expect("mint identifier");

        let stored = kv.get(DEVICE_IDENTIFIER_KEY).unwrap().expect("persisted");
        assert_uuid_v4_shape(&stored);
        assert_eq!(stored, first.to_string());

        let second = ids.get_or_create().expect("re-read identifier");
        assert_eq!(first, second);
    }

    #[test]
    fn identifier_is_stable_across_store_instances() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let first = {
            let kv = Arc::new(FileKvStore::open(StoragePaths::new(dir.path())).unwrap());
            DeviceIdStore::new(kv).get_or_create().unwrap()
        };
        let second = {
            let kv = Arc::new(FileKvStore::open(StoragePaths::new(dir.path())).unwrap());
            DeviceIdStore::new(kv).get_or_create().unwrap()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn regenerate_yields_a_different_identifier() {
        let ids = memory_store();
        let before = ids.get_or_create().unwrap();
        let after = ids.regenerate().unwrap();

        assert_ne!(before, after);
        assert_uuid_v4_shape(&after.to_string());
        assert_eq!(ids.get_or_create().unwrap(), after);
    }

    #[test]
    fn clear_forces_a_fresh_identifier() {
        let ids = memory_store();
        let before = ids.get_or_create().unwrap();

        ids.clear().unwrap();
        assert!(!ids.exists());

        let after = ids.get_or_create().unwrap();
        assert_ne!(before, after);
        assert!(ids.exists());
    }

    #[test]
    fn minted_identifiers_are_unique() {
        let ids = memory_store();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let id = ids.regenerate().unwrap();
            assert!(seen.insert(id), "identifier repeated: {id}");
        }
    }

    #[test]
    fn corrupt_stored_value_is_an_error_not_a_fallback() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(DEVICE_IDENTIFIER_KEY, "not-a-uuid").unwrap();

        let ids = DeviceIdStore::new(kv.clone());
        let err = ids.get_or_create().unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Storage(StorageError::Corrupt(_))
        ));
        // The corrupt value stays put; nothing is silently regenerated.
        assert_eq!(
            kv.get(DEVICE_IDENTIFIER_KEY).unwrap().as_deref(),
            Some("not-a-uuid")
        );
    }

    #[test]
    fn loser_of_first_write_race_adopts_the_winner() {
        let kv = Arc::new(MemoryKvStore::new());
        let a = DeviceIdStore::new(kv.clone());
        let b = DeviceIdStore::new(kv);

        let from_a = a.get_or_create().unwrap();
        let from_b = b.get_or_create().unwrap();
        assert_eq!(from_a, from_b);
    }
}
