// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! # Status Poller
//!
//! Background task that periodically asks the validation state machine to
//! re-check the decision while an authorization is outstanding.
//!
//! ## Strategy
//!
//! On activation the poller performs an immediate check, then repeats at a
//! fixed interval (default 30 s) until either a decision is reached, the
//! polling ceiling (default 600 s) is hit, or the task is cancelled from
//! outside. Hitting the ceiling retires only the repeating task; the user
//! can still refresh manually via `DeviceValidator::check_status`.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. Cancellation is checked both
//! before each tick and while sleeping, so no check runs after the token is
//! triggered (no dangling late callback after screen teardown).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::machine::{DeviceValidator, SessionIdentity};

/// Default interval between status checks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default ceiling after which the repeating task retires itself.
const DEFAULT_POLL_CEILING: Duration = Duration::from_secs(600);

/// Bounded recurring status check for an outstanding authorization.
pub struct StatusPoller {
    validator: Arc<DeviceValidator>,
    identity: SessionIdentity,
    poll_interval: Duration,
    poll_ceiling: Duration,
}

impl StatusPoller {
    /// Create a poller for the given validator and session context.
    pub fn new(validator: Arc<DeviceValidator>, identity: SessionIdentity) -> Self {
        Self {
            validator,
            identity,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_ceiling: DEFAULT_POLL_CEILING,
        }
    }

    /// Override the tick interval and ceiling.
    pub fn with_timing(mut self, interval: Duration, ceiling: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_ceiling = ceiling;
        self
    }

    /// Run the polling loop until a decision, the ceiling, or cancellation.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            ceiling_secs = self.poll_ceiling.as_secs(),
            "Status poller starting"
        );

        let retire_at = tokio::time::Instant::now() + self.poll_ceiling;

        loop {
            if shutdown.is_cancelled() {
                info!("Status poller shutting down");
                return;
            }

            let status = self.validator.check_status(&self.identity).await;

            if status.is_terminal() {
                info!(valid = status.is_valid(), "Status poller finished: decision reached");
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Status poller shutting down");
                    return;
                }
            }

            if tokio::time::Instant::now() >= retire_at {
                info!("Status poller retiring: polling ceiling reached");
                return;
            }
        }
    }
}
