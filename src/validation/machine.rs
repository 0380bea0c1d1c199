// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Validation state machine for the current user+device pair.
//!
//! Owns the mutable [`ValidationStatus`] and orchestrates trust authority
//! calls. Status moves `Unknown -> {Pending, Valid, Invalid}` and
//! `Pending -> {Valid, Invalid}`; `reset` returns to `Unknown` from any
//! state.
//!
//! ## Concurrency
//!
//! Multiple flows may be in flight at once (manual refresh plus a scheduled
//! poll). Every operation takes a sequence ticket before its network call
//! and results are applied monotonically by that ticket: a result from a
//! superseded call is dropped, except that a terminal outcome may still land
//! while the current status is non-terminal. A stale `Pending` can therefore
//! never regress a decision. `reset` raises a barrier so results from calls
//! started before it are discarded. The authority operations themselves are
//! idempotent, so no per-operation locking is needed beyond this ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::gate::AccessGate;
use crate::identity::{DeviceDescriptor, DeviceIdentifier};
use crate::providers::{ChallengePhoto, StatusReport, TrustAuthority};

use super::ValidationStatus;

/// Error-slot message recorded when `validate` fires before identity and
/// identifier are resolved.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Per-call identity context. Explicit rather than ambient: callers pass the
/// resolved user and device, and operations that fire before initialization
/// completes see the unresolved `None` fields.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub user_id: Option<String>,
    pub device_id: Option<DeviceIdentifier>,
}

impl SessionIdentity {
    pub fn new(user_id: Option<String>, device_id: Option<DeviceIdentifier>) -> Self {
        Self { user_id, device_id }
    }

    pub fn resolved(user_id: impl Into<String>, device_id: DeviceIdentifier) -> Self {
        Self {
            user_id: Some(user_id.into()),
            device_id: Some(device_id),
        }
    }

    fn parts(&self) -> Option<(&str, &DeviceIdentifier)> {
        match (self.user_id.as_deref(), self.device_id.as_ref()) {
            (Some(user_id), Some(device_id)) => Some((user_id, device_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    status: ValidationStatus,
    last_error: Option<String>,
    /// Ticket of the most recently applied result.
    applied_seq: u64,
    /// Results from tickets below this are dropped unconditionally (reset).
    barrier_seq: u64,
    in_flight: u32,
}

/// Decrements the loading counter when dropped, so the flag resolves on
/// every exit path of an operation.
struct LoadingGuard<'a> {
    inner: &'a Mutex<Inner>,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(inner: &'a Mutex<Inner>) -> Self {
        lock(inner).in_flight += 1;
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        lock(self.inner).in_flight -= 1;
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().expect("validation state lock poisoned")
}

/// State machine gating application access on device trust.
pub struct DeviceValidator {
    authority: Arc<dyn TrustAuthority>,
    gate: Arc<dyn AccessGate>,
    inner: Mutex<Inner>,
    next_seq: AtomicU64,
}

impl DeviceValidator {
    pub fn new(authority: Arc<dyn TrustAuthority>, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            authority,
            gate,
            inner: Mutex::new(Inner::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ValidationStatus {
        lock(&self.inner).status.clone()
    }

    /// Message from the most recent failed or skipped operation, cleared by
    /// the next applied result or by `reset`.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }

    /// Whether any operation is currently in flight.
    pub fn is_loading(&self) -> bool {
        lock(&self.inner).in_flight > 0
    }

    /// Check whether the pair is already trusted.
    ///
    /// Fires on startup before initialization may have completed, so missing
    /// identity or identifier is a no-op that records [`INSUFFICIENT_DATA`]
    /// rather than an error. Authority failures leave the status unchanged
    /// and land in the error slot.
    pub async fn validate(&self, identity: &SessionIdentity) -> ValidationStatus {
        let Some((user_id, device_id)) = identity.parts() else {
            return self.skip_insufficient(identity);
        };

        let seq = self.take_ticket();
        let _loading = LoadingGuard::acquire(&self.inner);

        match self.authority.check_validity(user_id, device_id).await {
            Ok(true) => self.apply(seq, ValidationStatus::Valid { approved_at: None }),
            Ok(false) => self.apply(
                seq,
                ValidationStatus::Invalid {
                    rejected_at: None,
                    rejection_reason: None,
                },
            ),
            Err(e) => self.record_error(seq, e.to_string()),
        }
        self.status()
    }

    /// Register intent to validate this device with the authority.
    ///
    /// User-initiated: unresolved identity or identifier is a hard
    /// precondition error and no network call is made.
    pub async fn request_authorization(
        &self,
        identity: &SessionIdentity,
        descriptor: &DeviceDescriptor,
    ) -> Result<(), ValidationError> {
        let (user_id, device_id) = identity
            .parts()
            .ok_or(ValidationError::Precondition("user identity and device identifier"))?;

        let seq = self.take_ticket();
        let _loading = LoadingGuard::acquire(&self.inner);

        match self
            .authority
            .request_authorization(user_id, device_id, descriptor)
            .await
        {
            Ok(()) => {
                self.apply(
                    seq,
                    ValidationStatus::Pending {
                        estimated_wait_secs: None,
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.record_error(seq, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Transmit the captured challenge photo.
    pub async fn submit_challenge(
        &self,
        identity: &SessionIdentity,
        photo: &ChallengePhoto,
    ) -> Result<(), ValidationError> {
        let (user_id, device_id) = identity
            .parts()
            .ok_or(ValidationError::Precondition("user identity and device identifier"))?;

        let seq = self.take_ticket();
        let _loading = LoadingGuard::acquire(&self.inner);

        match self
            .authority
            .submit_challenge(user_id, device_id, photo)
            .await
        {
            Ok(()) => {
                self.apply(
                    seq,
                    ValidationStatus::Pending {
                        estimated_wait_secs: None,
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.record_error(seq, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Poll the authority for the decision and fold it into the status.
    pub async fn check_status(&self, identity: &SessionIdentity) -> ValidationStatus {
        let Some((user_id, device_id)) = identity.parts() else {
            return self.skip_insufficient(identity);
        };

        let seq = self.take_ticket();
        let _loading = LoadingGuard::acquire(&self.inner);

        match self.authority.poll_status(user_id, device_id).await {
            Ok(report) => self.apply(seq, status_from_report(report)),
            Err(e) => self.record_error(seq, e.to_string()),
        }
        self.status()
    }

    /// Force `Unknown`, clear the error slot, and discard results from any
    /// call started before the reset.
    pub fn reset(&self) {
        let seq = self.take_ticket();
        let mut inner = lock(&self.inner);
        inner.status = ValidationStatus::Unknown;
        inner.last_error = None;
        inner.applied_seq = seq;
        inner.barrier_seq = seq;
    }

    /// Reset and restart the flow with a fresh validity check.
    pub async fn revalidate(&self, identity: &SessionIdentity) -> ValidationStatus {
        self.reset();
        self.validate(identity).await
    }

    fn take_ticket(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn skip_insufficient(&self, identity: &SessionIdentity) -> ValidationStatus {
        debug!(
            has_user = identity.user_id.is_some(),
            has_device = identity.device_id.is_some(),
            "device validation skipped: context not resolved yet"
        );
        let mut inner = lock(&self.inner);
        inner.last_error = Some(INSUFFICIENT_DATA.to_string());
        inner.status.clone()
    }

    /// Apply a result under the monotonic ordering policy. Signals the
    /// access gate outside the lock on a transition into `Valid`.
    fn apply(&self, seq: u64, new_status: ValidationStatus) {
        let became_valid = {
            let mut inner = lock(&self.inner);
            if seq < inner.barrier_seq {
                return;
            }
            if seq < inner.applied_seq
                && (!new_status.is_terminal() || inner.status.is_terminal())
            {
                // Superseded: only a terminal outcome may land on a
                // still-undecided status.
                return;
            }
            inner.applied_seq = inner.applied_seq.max(seq);
            let became_valid = new_status.is_valid() && !inner.status.is_valid();
            inner.status = new_status;
            inner.last_error = None;
            became_valid
        };

        if became_valid {
            self.gate.complete_device_validation();
        }
    }

    /// Record a failure without touching the status. Stale failures from
    /// superseded calls are dropped.
    fn record_error(&self, seq: u64, message: String) {
        warn!(error = %message, "device validation call failed");
        let mut inner = lock(&self.inner);
        if seq < inner.barrier_seq || seq < inner.applied_seq {
            return;
        }
        inner.last_error = Some(message);
    }
}

fn status_from_report(report: StatusReport) -> ValidationStatus {
    match report {
        StatusReport::Approved { processed_at } => ValidationStatus::Valid {
            approved_at: processed_at,
        },
        StatusReport::Rejected {
            reason,
            processed_at,
        } => ValidationStatus::Invalid {
            rejected_at: processed_at,
            rejection_reason: reason,
        },
        StatusReport::Pending {
            estimated_wait_secs,
            ..
        } => ValidationStatus::Pending {
            estimated_wait_secs,
        },
    }
}
