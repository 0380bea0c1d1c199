// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! # Persistent Storage Module
//!
//! Key-value persistence for device-trust state. The only durable tenant is
//! the per-installation device identifier, but the store is generic so future
//! client state (cached descriptors, enrollment bookkeeping) lands in the
//! same layout.
//!
//! ## Storage Layout
//!
//! ```text
//! <DATA_DIR>/
//!   kv/
//!     device_identifier   # canonical UUID-v4 string, no trailing newline
//! ```
//!
//! ## Guarantees
//!
//! - Replacing writes are atomic (temp file + rename).
//! - First writes (`set_if_absent`) are atomic against concurrent writers
//!   via `create_new`, so racing initializations cannot persist two
//!   different identifiers.

pub mod kv;
pub mod paths;

pub use kv::{FileKvStore, KeyValueStore, MemoryKvStore, StorageError, StorageResult};
pub use paths::StoragePaths;
