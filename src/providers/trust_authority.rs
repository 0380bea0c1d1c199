// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Northstar Invest

//! Trust authority integration for device validation.
//!
//! Stateless request/response operations against the remote trust authority:
//! check validity, request authorization, submit the challenge photo, poll
//! the decision. The client never retries internally; retry policy belongs to
//! the caller (the status poller ticks on its own schedule).

use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use url::Url;

use crate::config;
use crate::identity::{DeviceDescriptor, DeviceIdentifier};

/// Transport timeout for individual authority calls. The polling ceiling is
/// the only other timeout policy in this crate.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// Client configuration problem (missing env, bad base URL).
    #[error("trust authority configuration missing: {0}")]
    Config(String),

    /// No response reached us.
    #[error("trust authority unreachable: {0}")]
    Network(String),

    /// The authority responded with a failure.
    #[error("trust authority error: {message}")]
    Server {
        status: Option<u16>,
        message: String,
    },

    /// The authority responded with a shape we do not recognize.
    #[error("trust authority response was invalid: {0}")]
    Protocol(String),
}

/// Captured challenge artifact (face photo). Treated as an opaque blob;
/// base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePhoto(Vec<u8>);

impl ChallengePhoto {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.0)
    }
}

/// Decision state reported by the authority, validated at the transport
/// boundary. Unrecognized or contradictory payloads are rejected as
/// [`AuthorityError::Protocol`] rather than passed through.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    Pending {
        submitted_at: Option<DateTime<Utc>>,
        estimated_wait_secs: Option<u64>,
    },
    Approved {
        processed_at: Option<DateTime<Utc>>,
    },
    Rejected {
        reason: Option<String>,
        processed_at: Option<DateTime<Utc>>,
    },
}

/// Raw status payload as the authority sends it.
#[derive(Debug, Deserialize)]
struct RawStatusResponse {
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    rejected: bool,
    rejection_reason: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    estimated_wait_secs: Option<u64>,
}

impl StatusReport {
    fn from_raw(raw: RawStatusResponse) -> Result<Self, AuthorityError> {
        match (raw.approved, raw.rejected) {
            (true, true) => Err(AuthorityError::Protocol(
                "status payload flags both approved and rejected".to_string(),
            )),
            (true, false) => Ok(StatusReport::Approved {
                processed_at: raw.processed_at,
            }),
            (false, true) => Ok(StatusReport::Rejected {
                reason: raw.rejection_reason,
                processed_at: raw.processed_at,
            }),
            (false, false) => Ok(StatusReport::Pending {
                submitted_at: raw.submitted_at,
                estimated_wait_secs: raw.estimated_wait_secs,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidityResponse {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    acknowledged: bool,
}

/// Remote trust authority contract.
///
/// All four operations are idempotent by intent: repeating a call must not
/// corrupt server-side state, which is what lets the state machine overwrite
/// results without cross-call locking.
#[async_trait]
pub trait TrustAuthority: Send + Sync {
    /// Ask whether the user+device pair is currently trusted.
    async fn check_validity(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
    ) -> Result<bool, AuthorityError>;

    /// Register intent to validate this device. Repeating the call while a
    /// request is already pending must not error.
    async fn request_authorization(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
        descriptor: &DeviceDescriptor,
    ) -> Result<(), AuthorityError>;

    /// Transmit the captured challenge photo. Succeeds or fails independently
    /// of any prior `request_authorization`.
    async fn submit_challenge(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
        photo: &ChallengePhoto,
    ) -> Result<(), AuthorityError>;

    /// Read the current decision state. Safe to call arbitrarily often.
    async fn poll_status(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
    ) -> Result<StatusReport, AuthorityError>;
}

/// HTTPS client for the trust authority, bearer-authenticated per request.
#[derive(Debug, Clone)]
pub struct TrustAuthorityClient {
    base_url: String,
    bearer_token: String,
    http: Client,
}

impl TrustAuthorityClient {
    /// Build a client from explicit configuration.
    pub fn new(base_url: &str, bearer_token: impl Into<String>) -> Result<Self, AuthorityError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| AuthorityError::Config(format!("invalid base URL `{base_url}`: {e}")))?;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthorityError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
            http,
        })
    }

    /// Build a client from the environment (see `config`).
    pub fn from_env() -> Result<Self, AuthorityError> {
        let base_url = env_required(config::TRUST_API_BASE_URL_ENV)?;
        let token = env_required(config::TRUST_API_TOKEN_ENV)?;
        Self::new(&base_url, token)
    }

    fn endpoint(&self, user_id: &str, device_id: &DeviceIdentifier, leaf: &str) -> String {
        format!(
            "{}/v1/users/{user_id}/devices/{device_id}/{leaf}",
            self.base_url
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AuthorityError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| AuthorityError::Network(format!("GET {url} failed: {e}")))?;
        decode_json(url, response).await
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response, AuthorityError> {
        self.http
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| AuthorityError::Network(format!("POST {url} failed: {e}")))
    }
}

async fn decode_json<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, AuthorityError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(server_error(status.as_u16(), body));
    }
    response
        .json()
        .await
        .map_err(|e| AuthorityError::Protocol(format!("{url} returned invalid JSON: {e}")))
}

fn server_error(status: u16, body: String) -> AuthorityError {
    let message = if body.trim().is_empty() {
        format!("request returned HTTP {status}")
    } else {
        body
    };
    AuthorityError::Server {
        status: Some(status),
        message,
    }
}

fn require_ack(ack: AckResponse) -> Result<(), AuthorityError> {
    if ack.acknowledged {
        Ok(())
    } else {
        Err(AuthorityError::Protocol(
            "authority did not acknowledge the request".to_string(),
        ))
    }
}

#[async_trait]
impl TrustAuthority for TrustAuthorityClient {
    async fn check_validity(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
    ) -> Result<bool, AuthorityError> {
        let url = self.endpoint(user_id, device_id, "validity");
        let response: ValidityResponse = self.get_json(&url).await?;
        Ok(response.valid)
    }

    async fn request_authorization(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
        descriptor: &DeviceDescriptor,
    ) -> Result<(), AuthorityError> {
        let url = self.endpoint(user_id, device_id, "authorization");
        let payload = json!({ "descriptor": descriptor });
        let response = self.post_json(&url, &payload).await?;

        // An authorization request is already pending for this pair; the
        // retry is acknowledged rather than surfaced as a failure.
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        require_ack(decode_json(&url, response).await?)
    }

    async fn submit_challenge(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
        photo: &ChallengePhoto,
    ) -> Result<(), AuthorityError> {
        let url = self.endpoint(user_id, device_id, "challenge");
        let payload = json!({ "photo_base64": photo.to_base64() });
        let response = self.post_json(&url, &payload).await?;
        require_ack(decode_json(&url, response).await?)
    }

    async fn poll_status(
        &self,
        user_id: &str,
        device_id: &DeviceIdentifier,
    ) -> Result<StatusReport, AuthorityError> {
        let url = self.endpoint(user_id, device_id, "status");
        let raw: RawStatusResponse = self.get_json(&url).await?;
        StatusReport::from_raw(raw)
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_required(name: &str) -> Result<String, AuthorityError> {
    env_optional(name).ok_or_else(|| AuthorityError::Config(name.to_string()))
}
