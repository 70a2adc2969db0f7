//! License validation with a strict trust order
//!
//! 1. Remote: the authority answers HTTP 200 with `valid=true`
//! 2. Local: the built-in reference table, with expiry
//! 3. Grace: a cached remote success for the same key, younger than 7 days
//!
//! The chain is never reordered or raced. Every failure along the way is a
//! fall-through, never an error.

pub mod grace;
pub mod keygen;
pub mod registry;

pub use grace::{LastValidation, GRACE_PERIOD_DAYS};
pub use keygen::{generate_license_key, GeneratedLicense};

use crate::authority::{Authority, LicenseRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use grace::GraceDecision;

/// How a license decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    ValidRemote,
    ValidLocal,
    ValidGrace { days_remaining: i64 },
    Invalid,
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LicenseStatus::ValidRemote => write!(f, "valid (remote)"),
            LicenseStatus::ValidLocal => write!(f, "valid (local)"),
            LicenseStatus::ValidGrace { days_remaining } => {
                write!(f, "valid (grace, {days_remaining} days left)")
            }
            LicenseStatus::Invalid => write!(f, "invalid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseOutcome {
    pub status: LicenseStatus,
    pub institution: Option<String>,
    pub message: String,
}

impl LicenseOutcome {
    pub fn is_valid(&self) -> bool {
        self.status != LicenseStatus::Invalid
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: LicenseStatus::Invalid,
            institution: None,
            message: message.into(),
        }
    }
}

pub struct LicenseValidator {
    authority: Arc<dyn Authority>,
    cache_path: PathBuf,
    installation_id: String,
    app_version: String,
}

impl LicenseValidator {
    pub fn new(
        authority: Arc<dyn Authority>,
        cache_path: impl Into<PathBuf>,
        installation_id: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            cache_path: cache_path.into(),
            installation_id: installation_id.into(),
            app_version: app_version.into(),
        }
    }

    pub async fn validate(&self, license_key: &str) -> LicenseOutcome {
        self.validate_at(license_key, Utc::now()).await
    }

    /// Run the chain as of `now`
    #[instrument(skip(self, license_key), fields(authority = self.authority.name()))]
    pub async fn validate_at(&self, license_key: &str, now: DateTime<Utc>) -> LicenseOutcome {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return LicenseOutcome::invalid("No license key provided");
        }

        if let Some(outcome) = self.validate_remote(license_key, now).await {
            return outcome;
        }

        warn!("Remote validation failed, checking local...");
        let mut expired_message = None;
        match registry::lookup(license_key) {
            Some(record) if record.is_expired(now) => {
                let expiry = record
                    .expires_at
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                expired_message = Some(format!("License expired on {expiry}"));
            }
            Some(record) => {
                return LicenseOutcome {
                    status: LicenseStatus::ValidLocal,
                    institution: Some(record.institution.to_string()),
                    message: "Valid".to_string(),
                };
            }
            None => debug!("Key not in local license table"),
        }

        warn!("Local validation failed, checking grace period...");
        let cache = LastValidation::load(&self.cache_path);
        let decision = grace::check(cache.as_ref(), license_key, now);
        match &decision {
            GraceDecision::Within {
                days_remaining,
                institution,
            } => {
                info!("{}", decision.message());
                LicenseOutcome {
                    status: LicenseStatus::ValidGrace {
                        days_remaining: *days_remaining,
                    },
                    institution: Some(institution.clone()),
                    message: decision.message(),
                }
            }
            _ => LicenseOutcome::invalid(expired_message.unwrap_or_else(|| decision.message())),
        }
    }

    async fn validate_remote(&self, license_key: &str, now: DateTime<Utc>) -> Option<LicenseOutcome> {
        let request = LicenseRequest {
            license_key: license_key.to_string(),
            installation_id: self.installation_id.clone(),
            timestamp: crate::rfc3339(now),
            app_version: self.app_version.clone(),
        };

        match self.authority.validate_license(&request).await {
            Ok(response) if response.valid => {
                let institution = response
                    .institution_name
                    .unwrap_or_else(|| "Unknown".to_string());
                let cache = LastValidation::new(license_key, institution.clone(), now);
                if let Err(e) = cache.save(&self.cache_path) {
                    warn!("Could not persist validation for grace period: {:#}", e);
                }
                Some(LicenseOutcome {
                    status: LicenseStatus::ValidRemote,
                    institution: Some(institution),
                    message: response.message.unwrap_or_else(|| "Valid".to_string()),
                })
            }
            Ok(response) => {
                debug!(
                    "Authority rejected key: {}",
                    response.message.as_deref().unwrap_or("no message")
                );
                None
            }
            Err(e) => {
                warn!("Remote license validation failed: {}", e);
                None
            }
        }
    }
}
