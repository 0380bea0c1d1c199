// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Device identity: the per-installation identifier and the static device
//! descriptor attached to authorization requests.

pub mod descriptor;
pub mod store;

pub use descriptor::DeviceDescriptor;
pub use store::{DeviceIdStore, DeviceIdentifier, IdentityError, DEVICE_IDENTIFIER_KEY};
