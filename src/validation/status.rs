// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Validation status for the current user+device pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation lifecycle status.
///
/// Owned exclusively by the validation state machine and mutated only
/// through its defined transitions; presentation code observes it read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Not yet checked for this user+device pair.
    Unknown,
    /// Authorization requested or challenge submitted; decision outstanding.
    Pending {
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_wait_secs: Option<u64>,
    },
    /// Device trusted by the authority.
    Valid {
        #[serde(skip_serializing_if = "Option::is_none")]
        approved_at: Option<DateTime<Utc>>,
    },
    /// Device rejected by the authority.
    Invalid {
        #[serde(skip_serializing_if = "Option::is_none")]
        rejected_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rejection_reason: Option<String>,
    },
}

impl Default for ValidationStatus {
    fn default() -> Self {
        ValidationStatus::Unknown
    }
}

impl ValidationStatus {
    /// Whether the authority has delivered a decision. Terminal states are
    /// stable but resettable via an explicit revalidate.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Valid { .. } | ValidationStatus::Invalid { .. }
        )
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid { .. })
    }

    /// Rejection reason on `Invalid`, if the authority supplied one.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ValidationStatus::Invalid {
                rejection_reason, ..
            } => rejection_reason.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decided_states_are_terminal() {
        assert!(!ValidationStatus::Unknown.is_terminal());
        assert!(!ValidationStatus::Pending {
            estimated_wait_secs: None
        }
        .is_terminal());
        assert!(ValidationStatus::Valid { approved_at: None }.is_terminal());
        assert!(ValidationStatus::Invalid {
            rejected_at: None,
            rejection_reason: None
        }
        .is_terminal());
    }

    #[test]
    fn serializes_as_tagged_snake_case() {
        let status = ValidationStatus::Invalid {
            rejected_at: None,
            rejection_reason: Some("blurry photo".to_string()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "invalid");
        assert_eq!(json["rejection_reason"], "blurry photo");
        assert!(json.get("rejected_at").is_none());
    }

    #[test]
    fn rejection_reason_only_on_invalid() {
        let invalid = ValidationStatus::Invalid {
            rejected_at: None,
            rejection_reason: Some("blurry photo".to_string()),
        };
        assert_eq!(invalid.rejection_reason(), Some("blurry photo"));
        assert_eq!(ValidationStatus::Unknown.rejection_reason(), None);
    }
}
