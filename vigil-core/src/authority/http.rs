//! HTTP authority client
//!
//! Plain JSON POSTs against the authority base URL. Every request carries
//! the installation id and license key headers and is bounded by the client
//! timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Authority, AuthorityError, Endpoint, LicenseRequest, LicenseResponse};

pub const MIN_TIMEOUT_SECONDS: u64 = 5;
pub const MAX_TIMEOUT_SECONDS: u64 = 10;

/// Clamp a configured timeout into the supported window
pub fn clamp_timeout(configured: u64) -> u64 {
    if configured < MIN_TIMEOUT_SECONDS {
        warn!(
            "Configured timeout_seconds={} is too low; using minimum of {} seconds",
            configured, MIN_TIMEOUT_SECONDS
        );
        MIN_TIMEOUT_SECONDS
    } else if configured > MAX_TIMEOUT_SECONDS {
        warn!(
            "Configured timeout_seconds={} is too high; using maximum of {} seconds",
            configured, MAX_TIMEOUT_SECONDS
        );
        MAX_TIMEOUT_SECONDS
    } else {
        configured
    }
}

/// reqwest-backed authority client
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
    license_key: String,
    installation_id: String,
}

impl HttpAuthority {
    pub fn new(
        base_url: &str,
        license_key: &str,
        installation_id: &str,
        timeout_seconds: u64,
    ) -> Result<Self> {
        let timeout_seconds = clamp_timeout(timeout_seconds);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            license_key: license_key.to_string(),
            installation_id: installation_id.to_string(),
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    async fn post(
        &self,
        endpoint: Endpoint,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, AuthorityError> {
        debug!("POST {}", self.url(endpoint));

        let response = self
            .client
            .post(self.url(endpoint))
            .header("X-License-Key", &self.license_key)
            .header("X-Installation-ID", &self.installation_id)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(AuthorityError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport_error(endpoint: Endpoint, err: reqwest::Error) -> AuthorityError {
    if err.is_timeout() {
        AuthorityError::Timeout { endpoint }
    } else {
        AuthorityError::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn validate_license(
        &self,
        request: &LicenseRequest,
    ) -> Result<LicenseResponse, AuthorityError> {
        let endpoint = Endpoint::LicenseValidate;
        let response = self.post(endpoint, request).await?;

        // Anything other than 200 falls through to local validation
        if response.status() != reqwest::StatusCode::OK {
            return Err(AuthorityError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        response
            .json::<LicenseResponse>()
            .await
            .map_err(|e| AuthorityError::InvalidResponse {
                endpoint,
                message: e.to_string(),
            })
    }

    async fn send(&self, endpoint: Endpoint, payload: &Value) -> Result<(), AuthorityError> {
        self.post(endpoint, payload).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
