// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Device validation agent: wires the identifier store, descriptor, trust
//! authority client, and state machine together and runs the flow end to
//! end. Stands in for the application shell around the trust core.

use std::{env, process, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use northstar_device_trust::{
    config,
    gate::AccessGate,
    identity::{DeviceDescriptor, DeviceIdStore},
    providers::{ChallengePhoto, TrustAuthorityClient},
    storage::{paths::DATA_ROOT, FileKvStore, StoragePaths},
    validation::{DeviceValidator, SessionIdentity, StatusPoller, ValidationStatus},
};

/// Gate implementation for the agent: signals are logged; the surrounding
/// application would navigate or tear down the session here.
struct LoggingGate;

impl AccessGate for LoggingGate {
    fn complete_device_validation(&self) {
        info!("Device validation complete; unlocking application access");
    }

    fn logout(&self) {
        info!("Logout requested");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let data_dir = env::var(config::DATA_DIR_ENV).unwrap_or_else(|_| DATA_ROOT.to_string());
    let kv = match FileKvStore::open(StoragePaths::new(&data_dir)) {
        Ok(kv) => kv,
        Err(e) => {
            error!(data_dir = %data_dir, error = %e, "Failed to open device-trust storage");
            process::exit(1);
        }
    };

    let ids = DeviceIdStore::new(Arc::new(kv));
    let device_id = match ids.get_or_create() {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to resolve device identifier");
            process::exit(1);
        }
    };
    info!(%device_id, "Device identifier resolved");

    let descriptor = DeviceDescriptor::collect();
    info!(
        platform = %descriptor.platform,
        os_version = %descriptor.os_version,
        model = %descriptor.model,
        "Device descriptor collected"
    );

    let Ok(user_id) = env::var(config::USER_ID_ENV) else {
        error!("{} must be set", config::USER_ID_ENV);
        process::exit(1);
    };

    let authority = match TrustAuthorityClient::from_env() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Trust authority client is not configured");
            process::exit(1);
        }
    };

    let validator = Arc::new(DeviceValidator::new(
        Arc::new(authority),
        Arc::new(LoggingGate),
    ));
    let identity = SessionIdentity::resolved(user_id, device_id);

    let status = validator.validate(&identity).await;
    info!(?status, "Initial validity check");
    if status.is_valid() {
        return;
    }

    if let Err(e) = validator.request_authorization(&identity, &descriptor).await {
        error!(error = %e, "Authorization request failed");
        process::exit(1);
    }
    info!("Authorization requested; waiting for the trust authority decision");

    if let Ok(path) = env::var(config::CHALLENGE_PHOTO_PATH_ENV) {
        let photo = match std::fs::read(&path) {
            Ok(bytes) => ChallengePhoto::from_bytes(bytes),
            Err(e) => {
                error!(path = %path, error = %e, "Could not read challenge photo");
                process::exit(1);
            }
        };
        if let Err(e) = validator.submit_challenge(&identity, &photo).await {
            error!(error = %e, "Challenge submission failed");
            process::exit(1);
        }
        info!(path = %path, "Challenge photo submitted");
    }

    let shutdown = CancellationToken::new();
    let mut poller_task = tokio::spawn(
        StatusPoller::new(validator.clone(), identity.clone()).run(shutdown.clone()),
    );

    tokio::select! {
        _ = &mut poller_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received; stopping status poller");
            shutdown.cancel();
            let _ = (&mut poller_task).await;
        }
    }

    match validator.status() {
        ValidationStatus::Valid { .. } => info!("Device is trusted"),
        ValidationStatus::Invalid {
            rejection_reason, ..
        } => {
            warn!(
                reason = rejection_reason.as_deref().unwrap_or("no reason given"),
                "Device was rejected"
            );
        }
        other => {
            info!(status = ?other, "Validation still undecided");
            if let Some(message) = validator.last_error() {
                warn!(%message, "Last validation error");
            }
        }
    }
}
