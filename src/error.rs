// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

use crate::providers::AuthorityError;

/// Error surfaced by explicit user actions on the validation state machine.
///
/// Background transitions (`validate`, `check_status`) recover from
/// authority failures by recording them in the machine's error slot instead;
/// only user-initiated operations raise.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Required context was not resolved before a user-initiated action.
    #[error("missing {0} for device validation")]
    Precondition(&'static str),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}
