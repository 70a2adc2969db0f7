//! Remote authority - abstraction over the licensing/monitoring service
//!
//! Implementations:
//! - [`HttpAuthority`] (reqwest, the production client)
//! - [`OfflineAuthority`] (always unreachable; used when `VIGIL_OFFLINE` is set)
//! - a recording mock in tests
//!
//! Every failure is an [`AuthorityError`]. Callers degrade to local-only
//! behavior on any error; none of them is surfaced to the application.

mod http;

pub use http::{clamp_timeout, HttpAuthority, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Endpoints exposed by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    LicenseValidate,
    Telemetry,
    IntegrityReport,
    Alerts,
    Audit,
    SupportAccessGranted,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::LicenseValidate => "/api/license/validate",
            Endpoint::Telemetry => "/api/telemetry",
            Endpoint::IntegrityReport => "/api/integrity-report",
            Endpoint::Alerts => "/api/alerts",
            Endpoint::Audit => "/api/audit",
            Endpoint::SupportAccessGranted => "/api/support-access-granted",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Body of `POST /api/license/validate`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseRequest {
    pub license_key: String,
    pub installation_id: String,
    pub timestamp: String,
    pub app_version: String,
}

/// Authority answer to a license validation (HTTP 200 only)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LicenseResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub institution_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Transport-level failures talking to the authority
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Authority client is disabled (offline mode)")]
    Offline,

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: Endpoint },

    #[error("Request to {endpoint} failed: {message}")]
    Transport { endpoint: Endpoint, message: String },

    #[error("Server returned {status} for {endpoint}")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("Malformed response from {endpoint}: {message}")]
    InvalidResponse { endpoint: Endpoint, message: String },
}

/// Client for the remote authority
#[async_trait]
pub trait Authority: Send + Sync {
    /// Validate a license key. Only an HTTP 200 yields `Ok`.
    async fn validate_license(
        &self,
        request: &LicenseRequest,
    ) -> Result<LicenseResponse, AuthorityError>;

    /// Fire a JSON payload at an endpoint; the response body is ignored
    async fn send(&self, endpoint: Endpoint, payload: &Value) -> Result<(), AuthorityError>;

    /// Client identifier for logging
    fn name(&self) -> &'static str;
}

/// Authority that is never reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineAuthority;

#[async_trait]
impl Authority for OfflineAuthority {
    async fn validate_license(
        &self,
        _request: &LicenseRequest,
    ) -> Result<LicenseResponse, AuthorityError> {
        Err(AuthorityError::Offline)
    }

    async fn send(&self, _endpoint: Endpoint, _payload: &Value) -> Result<(), AuthorityError> {
        Err(AuthorityError::Offline)
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Mock authority for unit tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockAuthority {
    /// License answer; `None` simulates an unreachable server
    pub license: Option<LicenseResponse>,
    /// Make every `send` fail
    pub fail_sends: bool,
    pub license_calls: std::sync::Mutex<Vec<LicenseRequest>>,
    pub sent: std::sync::Mutex<Vec<(Endpoint, Value)>>,
}

#[cfg(test)]
impl MockAuthority {
    pub fn answering(response: LicenseResponse) -> Self {
        Self {
            license: Some(response),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_sends: true,
            ..Default::default()
        }
    }

    pub fn sent_to(&self, endpoint: Endpoint) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn license_call_count(&self) -> usize {
        self.license_calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Authority for MockAuthority {
    async fn validate_license(
        &self,
        request: &LicenseRequest,
    ) -> Result<LicenseResponse, AuthorityError> {
        self.license_calls.lock().unwrap().push(request.clone());
        self.license.clone().ok_or(AuthorityError::Transport {
            endpoint: Endpoint::LicenseValidate,
            message: "connection refused".to_string(),
        })
    }

    async fn send(&self, endpoint: Endpoint, payload: &Value) -> Result<(), AuthorityError> {
        if self.fail_sends {
            return Err(AuthorityError::Transport {
                endpoint,
                message: "connection refused".to_string(),
            });
        }
        self.sent.lock().unwrap().push((endpoint, payload.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
