//! Grace-period cache of the last successful remote validation

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::trust::hasher::digest_bytes;

pub const GRACE_PERIOD_DAYS: i64 = 7;

/// Persisted record of the last successful remote validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastValidation {
    pub timestamp: String,
    #[serde(default = "unknown_institution")]
    pub institution_name: String,
    #[serde(default)]
    pub valid: bool,
    /// SHA-256 of the key that earned this validation
    #[serde(default)]
    pub key_fingerprint: String,
}

fn unknown_institution() -> String {
    "Unknown".to_string()
}

pub fn key_fingerprint(license_key: &str) -> String {
    digest_bytes(license_key.as_bytes()).into_string()
}

/// Parse RFC 3339, or the offset-less ISO form older caches contain (read as UTC)
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

impl LastValidation {
    pub fn new(
        license_key: &str,
        institution_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: crate::rfc3339(at),
            institution_name: institution_name.into(),
            valid: true,
            key_fingerprint: key_fingerprint(license_key),
        }
    }

    /// Load the cache; an absent or unreadable cache is `None`
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Error loading validation cache {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Ignoring corrupt validation cache {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize validation")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write validation cache {}", path.display()))
    }

    /// Whole days elapsed since this validation
    pub fn days_since(&self, now: DateTime<Utc>) -> Option<i64> {
        parse_timestamp(&self.timestamp).map(|at| (now - at).num_days().max(0))
    }
}

/// Grace decision
#[derive(Debug, Clone, PartialEq)]
pub enum GraceDecision {
    Within {
        days_remaining: i64,
        institution: String,
    },
    Expired {
        days_since: i64,
    },
    NoValidation,
}

impl GraceDecision {
    pub fn message(&self) -> String {
        match self {
            GraceDecision::Within { days_remaining, .. } => {
                format!("Grace period: {days_remaining} days remaining")
            }
            GraceDecision::Expired { days_since } => {
                format!("Grace period expired ({days_since} days since last validation)")
            }
            GraceDecision::NoValidation => "No previous validation found".to_string(),
        }
    }
}

/// Decide whether `license_key` may run on a cached validation.
///
/// Only a successful validation earned by the same key counts.
pub fn check(cache: Option<&LastValidation>, license_key: &str, now: DateTime<Utc>) -> GraceDecision {
    let Some(cache) = cache.filter(|c| c.valid && c.key_fingerprint == key_fingerprint(license_key))
    else {
        return GraceDecision::NoValidation;
    };

    let Some(days_since) = cache.days_since(now) else {
        warn!("Validation cache has an unreadable timestamp: {}", cache.timestamp);
        return GraceDecision::NoValidation;
    };

    if days_since < GRACE_PERIOD_DAYS {
        GraceDecision::Within {
            days_remaining: GRACE_PERIOD_DAYS - days_since,
            institution: cache.institution_name.clone(),
        }
    } else {
        GraceDecision::Expired { days_since }
    }
}
